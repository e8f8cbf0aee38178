//! Requirements document (PRD) model.
//!
//! The on-disk shape mirrors the JSON written by the conversion step and
//! edited by the agent, so field names keep their mixed casing
//! (`branchName`, `userStories`, `acceptanceCriteria`). Fields this crate
//! does not know about are carried in `extra` and written back untouched.

use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::selector::next_pending;

/// A single unit of work with acceptance criteria and a pass flag.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    pub priority: i64,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prd {
    pub project: String,
    #[serde(rename = "branchName")]
    pub branch_name: String,
    pub description: String,
    #[serde(default)]
    pub source_spec: String,
    #[serde(default = "timestamp_now")]
    pub created_at: String,
    #[serde(default = "timestamp_now")]
    pub updated_at: String,
    #[serde(rename = "userStories")]
    pub user_stories: Vec<Story>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Prd {
    /// Pending story with the lowest priority; ties go to declaration order.
    pub fn next_pending_story(&self) -> Option<&Story> {
        next_pending(&self.user_stories)
    }

    pub fn find_story(&self, story_id: &str) -> Option<&Story> {
        self.user_stories.iter().find(|story| story.id == story_id)
    }

    /// Mark `story_id` as passing. Returns `false` if no such story exists.
    pub fn mark_complete(&mut self, story_id: &str, notes: Option<&str>) -> bool {
        self.mark_complete_at(story_id, notes, Local::now())
    }

    pub fn mark_complete_at(
        &mut self,
        story_id: &str,
        notes: Option<&str>,
        at: DateTime<Local>,
    ) -> bool {
        let stamp = format_timestamp(at);
        let Some(story) = self
            .user_stories
            .iter_mut()
            .find(|story| story.id == story_id)
        else {
            return false;
        };
        story.passes = true;
        story.completed_at = Some(stamp.clone());
        if let Some(notes) = notes.filter(|n| !n.is_empty()) {
            story.notes = notes.to_string();
        }
        self.updated_at = stamp;
        true
    }

    /// `(completed, total)` story counts.
    pub fn progress(&self) -> (usize, usize) {
        let completed = self.user_stories.iter().filter(|s| s.passes).count();
        (completed, self.user_stories.len())
    }

    /// True when every story passes. Vacuously true for an empty document;
    /// callers reject empty documents before starting a loop.
    pub fn is_complete(&self) -> bool {
        self.user_stories.iter().all(|s| s.passes)
    }

    pub fn pending_stories(&self) -> impl Iterator<Item = &Story> {
        self.user_stories.iter().filter(|s| !s.passes)
    }
}

/// Timestamp format used for `created_at`, `updated_at` and `completed_at`.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn timestamp_now() -> String {
    format_timestamp(Local::now())
}
