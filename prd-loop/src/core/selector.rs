//! Deterministic story selection.

use crate::prd::Story;

/// Find the pending story (`passes=false`) with the lowest priority.
///
/// Stories sharing a priority are resolved by declaration order: the first
/// one listed wins. Returns `None` if every story passes.
pub fn next_pending(stories: &[Story]) -> Option<&Story> {
    stories
        .iter()
        .filter(|story| !story.passes)
        .reduce(|best, story| {
            if story.priority < best.priority {
                story
            } else {
                best
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::story;

    #[test]
    fn picks_lowest_priority_pending_story() {
        let stories = vec![
            story("US-003", 3, false),
            story("US-001", 1, true),
            story("US-002", 2, false),
        ];
        let selected = next_pending(&stories).expect("pending story");
        assert_eq!(selected.id, "US-002");
    }

    #[test]
    fn never_returns_a_passing_story() {
        let stories = vec![story("US-001", 0, true), story("US-002", 5, false)];
        let selected = next_pending(&stories).expect("pending story");
        assert!(!selected.passes);
        assert_eq!(selected.id, "US-002");
    }

    #[test]
    fn priority_ties_resolve_to_declaration_order() {
        let stories = vec![
            story("US-b", 1, false),
            story("US-a", 1, false),
            story("US-c", 1, false),
        ];
        let selected = next_pending(&stories).expect("pending story");
        assert_eq!(selected.id, "US-b");
    }

    #[test]
    fn negative_priorities_sort_first() {
        let stories = vec![story("US-001", 0, false), story("US-002", -1, false)];
        assert_eq!(next_pending(&stories).map(|s| s.id.as_str()), Some("US-002"));
    }

    #[test]
    fn returns_none_when_all_pass() {
        let stories = vec![story("US-001", 1, true), story("US-002", 2, true)];
        assert!(next_pending(&stories).is_none());
    }
}
