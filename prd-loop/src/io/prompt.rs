//! Prompt rendering for one story iteration.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::prd::{Prd, Story};

const IMPLEMENTATION_TEMPLATE: &str = include_str!("prompts/implementation.md");

#[derive(Debug, Clone, Serialize)]
struct ProjectContext<'a> {
    name: &'a str,
    description: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct StoryContext<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
    acceptance_criteria: &'a [String],
    notes: Option<&'a str>,
}

impl<'a> StoryContext<'a> {
    fn from_story(story: &'a Story) -> Self {
        Self {
            id: &story.id,
            title: &story.title,
            description: story.description.trim(),
            acceptance_criteria: &story.acceptance_criteria,
            notes: Some(story.notes.trim()).filter(|notes| !notes.is_empty()),
        }
    }
}

/// Renders the implementation prompt handed to the agent.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("implementation", IMPLEMENTATION_TEMPLATE)
            .context("load implementation prompt template")?;
        Ok(Self { env })
    }

    /// Prompt for implementing `story`, pointing the agent at `prd_path` so it
    /// can flip the story's `passes` flag itself.
    pub fn render(&self, prd: &Prd, story: &Story, prd_path: &Path) -> Result<String> {
        let template = self.env.get_template("implementation")?;
        let rendered = template
            .render(context! {
                project => ProjectContext {
                    name: &prd.project,
                    description: prd.description.trim(),
                },
                story => StoryContext::from_story(story),
                prd_path => prd_path.display().to_string(),
            })
            .with_context(|| format!("render prompt for story {}", story.id))?;
        debug!(story_id = %story.id, bytes = rendered.len(), "prompt rendered");
        Ok(rendered)
    }
}
