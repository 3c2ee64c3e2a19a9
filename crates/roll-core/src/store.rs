//! Tab-keyed session ownership

use crate::session::Session;
use crate::types::TabId;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Sessions by tab; cheap to clone, clones share the map
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<TabId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; returns the session it replaced, if any
    pub async fn insert(&self, session: Session) -> Option<Session> {
        let tab = session.tab();
        let replaced = self.sessions.write().await.insert(tab, session);
        debug!(tab = %tab, replaced = replaced.is_some(), "Session stored");
        replaced
    }

    pub async fn remove(&self, tab: TabId) -> Option<Session> {
        self.sessions.write().await.remove(&tab)
    }

    pub async fn contains(&self, tab: TabId) -> bool {
        self.sessions.read().await.contains_key(&tab)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Registered tabs in ascending order
    pub async fn tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.sessions.read().await.keys().copied().collect();
        tabs.sort();
        tabs
    }

    /// Run `f` against the session of `tab`
    pub async fn with<R>(&self, tab: TabId, f: impl FnOnce(&Session) -> R) -> Result<R> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&tab).ok_or(Error::SessionNotFound(tab))?;
        Ok(f(session))
    }

    /// Run `f` against the session of `tab` with exclusive access
    pub async fn with_mut<R>(&self, tab: TabId, f: impl FnOnce(&mut Session) -> R) -> Result<R> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&tab).ok_or(Error::SessionNotFound(tab))?;
        Ok(f(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RollConfig;
    use crate::host::DocumentRef;
    use crate::sim::SimDocument;

    fn session(tab: u32) -> Session {
        let root: DocumentRef = Arc::new(SimDocument::new("page"));
        Session::new(TabId(tab), root, RollConfig::default())
    }

    #[tokio::test]
    async fn test_keyed_by_tab() {
        let store = SessionStore::new();
        assert!(store.insert(session(2)).await.is_none());
        assert!(store.insert(session(1)).await.is_none());
        assert!(store.insert(session(2)).await.is_some());

        assert_eq!(store.tabs().await, vec![TabId(1), TabId(2)]);
        assert_eq!(store.with(TabId(1), |s| s.config().tab_id).await.unwrap(), TabId(1));
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = SessionStore::new();
        let err = store.with_mut(TabId(9), |s| s.tab()).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(TabId(9))));
    }

    #[tokio::test]
    async fn test_clones_share_sessions() {
        let store = SessionStore::new();
        let other = store.clone();
        store.insert(session(1)).await;

        assert!(other.contains(TabId(1)).await);
        assert!(other.remove(TabId(1)).await.is_some());
        assert!(store.is_empty().await);
    }
}
