//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::prd::Prd;

/// Check semantic invariants not expressible in JSON Schema:
/// - No blank story ids
/// - No duplicate story ids
pub fn validate_invariants(prd: &Prd) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (index, story) in prd.user_stories.iter().enumerate() {
        if story.id.trim().is_empty() {
            errors.push(format!("userStories[{index}]: id must not be blank"));
            continue;
        }
        if !seen.insert(story.id.as_str()) {
            errors.push(format!(
                "userStories[{index}]: duplicate id '{}'",
                story.id
            ));
        }
    }
    errors
}
