//! Per-thread tool sessions.
//!
//! The registry is shared across concurrent turns on the same thread.
//! Creation is serialized per `(thread_id, tool_name)`: the first concurrent
//! creator wins and everyone else awaits its result.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::error::ToolError;
use crate::traits::{SessionHandle, ToolProvider};
use crate::types::ThreadId;

type SessionKey = (ThreadId, String);

/// Registry of live tool sessions keyed by `(thread_id, tool_name)`.
#[derive(Default)]
pub struct ToolSessionRegistry {
    inner: Mutex<HashMap<SessionKey, Arc<OnceCell<SessionHandle>>>>,
}

impl ToolSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the session for `(thread_id, provider.name())`, creating it on
    /// first use. Concurrent resolvers share a single creation attempt.
    pub async fn resolve(
        &self,
        provider: &dyn ToolProvider,
        thread_id: &ThreadId,
    ) -> Result<SessionHandle, ToolError> {
        let cell = self.cell_for(thread_id, provider.name()).await;
        let handle = cell
            .get_or_try_init(|| async {
                tracing::debug!(
                    thread_id = %thread_id,
                    tool = provider.name(),
                    "creating tool session"
                );
                provider.create_session(thread_id).await
            })
            .await?;
        Ok(handle.clone())
    }

    /// The already-created session, if any. Never triggers creation.
    pub async fn peek(&self, thread_id: &ThreadId, tool_name: &str) -> Option<SessionHandle> {
        let map = self.inner.lock().await;
        map.get(&(thread_id.clone(), tool_name.to_string()))
            .and_then(|cell| cell.get().cloned())
    }

    /// Drop the cached session so the next resolve re-creates it. Called when
    /// the provider reports the session as expired.
    pub async fn invalidate(&self, thread_id: &ThreadId, tool_name: &str) {
        let mut map = self.inner.lock().await;
        map.remove(&(thread_id.clone(), tool_name.to_string()));
    }

    async fn cell_for(&self, thread_id: &ThreadId, tool_name: &str) -> Arc<OnceCell<SessionHandle>> {
        let mut map = self.inner.lock().await;
        map.entry((thread_id.clone(), tool_name.to_string()))
            .or_default()
            .clone()
    }
}
