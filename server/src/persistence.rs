//! Interaction storage.
//!
//! [`InteractionSink`] is what the pipeline writes to after a response is
//! assembled; [`InteractionHistory`] is what the context builder reads back.
//! [`InMemoryInteractionStore`] implements both and is lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One learner turn and the tutor's answer to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub user_message: String,
    pub ai_response: String,
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(user_message: impl Into<String>, ai_response: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ai_response: ai_response.into(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait InteractionSink: Send + Sync {
    async fn save(&self, session_id: &str, interaction: Interaction) -> anyhow::Result<()>;
}

#[async_trait]
pub trait InteractionHistory: Send + Sync {
    /// The most recent `limit` interactions of a session, oldest first.
    async fn recent(&self, session_id: &str, limit: usize) -> anyhow::Result<Vec<Interaction>>;
}

/// Turns kept per session unless configured otherwise.
pub const DEFAULT_MAX_TURNS: usize = 50;

/// Cheaply cloneable; clones share the same map. Each session keeps only its
/// newest `max_turns` interactions.
#[derive(Debug, Clone)]
pub struct InMemoryInteractionStore {
    sessions: Arc<RwLock<HashMap<String, Vec<Interaction>>>>,
    max_turns: usize,
}

impl Default for InMemoryInteractionStore {
    fn default() -> Self {
        Self::with_max_turns(DEFAULT_MAX_TURNS)
    }
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            sessions: Arc::default(),
            max_turns: max_turns.max(1),
        }
    }

    pub async fn session_len(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl InteractionSink for InMemoryInteractionStore {
    async fn save(&self, session_id: &str, interaction: Interaction) -> anyhow::Result<()> {
        let mut sessions = self.sessions.write().await;
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push(interaction);
        let excess = turns.len().saturating_sub(self.max_turns);
        turns.drain(..excess);
        Ok(())
    }
}

#[async_trait]
impl InteractionHistory for InMemoryInteractionStore {
    async fn recent(&self, session_id: &str, limit: usize) -> anyhow::Result<Vec<Interaction>> {
        let sessions = self.sessions.read().await;
        let Some(turns) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let skip = turns.len().saturating_sub(limit);
        Ok(turns[skip..].to_vec())
    }
}
