// Lesson context building

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use llm_core::LessonContext;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::persistence::InteractionHistory;

/// Produces the context the generation service answers against.
#[async_trait]
pub trait ContextBuilder: Send + Sync {
    async fn build(
        &self,
        user_id: &str,
        session_id: &str,
        lesson_id: &str,
    ) -> anyhow::Result<LessonContext>;
}

/// One entry of the lesson catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub title: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Builds context from a static lesson catalog plus the session's recent
/// interactions.
pub struct LessonContextBuilder {
    lessons: HashMap<String, Lesson>,
    history: Arc<dyn InteractionHistory>,
    history_turns: usize,
}

impl LessonContextBuilder {
    pub fn new(
        lessons: HashMap<String, Lesson>,
        history: Arc<dyn InteractionHistory>,
        history_turns: usize,
    ) -> Self {
        Self {
            lessons,
            history,
            history_turns,
        }
    }

    /// Load the catalog from a JSON object keyed by lesson id.
    pub async fn from_file(
        path: impl AsRef<Path>,
        history: Arc<dyn InteractionHistory>,
        history_turns: usize,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read lesson catalog {}", path.display()))?;
        let lessons: HashMap<String, Lesson> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid lesson catalog {}", path.display()))?;
        Ok(Self::new(lessons, history, history_turns))
    }

    pub fn lesson_count(&self) -> usize {
        self.lessons.len()
    }
}

#[async_trait]
impl ContextBuilder for LessonContextBuilder {
    async fn build(
        &self,
        user_id: &str,
        session_id: &str,
        lesson_id: &str,
    ) -> anyhow::Result<LessonContext> {
        let lesson = self
            .lessons
            .get(lesson_id)
            .ok_or_else(|| anyhow!("unknown lesson: {lesson_id}"))?;

        let history = self
            .history
            .recent(session_id, self.history_turns)
            .await
            .context("failed to load session history")?;

        let turns: Vec<_> = history
            .iter()
            .map(|t| json!({ "learner": t.user_message, "tutor": t.ai_response }))
            .collect();

        Ok(LessonContext::new(json!({
            "userId": user_id,
            "lessonId": lesson_id,
            "lesson": lesson,
            "recentTurns": turns,
        })))
    }
}
