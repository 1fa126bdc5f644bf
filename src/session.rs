//! Per-client session registry
//!
//! Sessions record UX state only: which filenames a client uploaded and when
//! the session was created. Retrievable chunks always live in the global
//! knowledge base, so rotating a session's API-key fingerprint never
//! invalidates any data.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Stable fingerprint of an API key for change detection
fn key_fingerprint(api_key: &str) -> String {
    let prefix: String = api_key.chars().take(12).collect();
    format!("{}:{}", prefix, api_key.len())
}

/// Scratch state for one client
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub api_key_fingerprint: Option<String>,
    pub documents: Vec<String>,
}

/// Summary returned by the sessions listing endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub document_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Registry of active sessions, guarded by its own lock
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing session or mint a fresh one. A changed API key
    /// rotates the stored fingerprint without touching anything else.
    pub async fn get_or_create(
        &self,
        session_id: Option<&str>,
        api_key: Option<&str>,
    ) -> String {
        let fingerprint = api_key.map(key_fingerprint);
        let mut sessions = self.sessions.write().await;

        if let Some(id) = session_id {
            if let Some(session) = sessions.get_mut(id) {
                if fingerprint.is_some() && session.api_key_fingerprint != fingerprint {
                    debug!("Rotating API key fingerprint for session {}", id);
                    session.api_key_fingerprint = fingerprint;
                }
                return id.to_string();
            }
        }

        let new_id = Uuid::new_v4().to_string();
        sessions.insert(
            new_id.clone(),
            Session {
                session_id: new_id.clone(),
                created_at: Utc::now(),
                api_key_fingerprint: fingerprint,
                documents: Vec::new(),
            },
        );
        debug!("Created session {}", new_id);
        new_id
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Record a filename against a session for the UI listing
    pub async fn record_upload(&self, session_id: &str, filename: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            if !session.documents.iter().any(|d| d == filename) {
                session.documents.push(filename.to_string());
            }
        }
    }

    pub async fn delete(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .await
            .values()
            .map(|s| SessionSummary {
                session_id: s.session_id.clone(),
                document_count: s.documents.len(),
                created_at: s.created_at,
            })
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
