//! Registry snapshot of the remote fleet

use crate::model::Model;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

/// Events emitted whenever the registry is refreshed
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A fetch succeeded and the snapshot was replaced
    Refreshed { count: usize },
    /// A fetch failed; the previous snapshot is still in place
    RefreshFailed { error: String },
}

/// Point-in-time copy of the fleet, replaced wholesale on every fetch
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    models: Vec<Model>,
    fetched_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    /// Build a snapshot from a gateway listing
    ///
    /// Keeps the gateway's order and at most one record per id (first wins).
    pub fn new(models: Vec<Model>) -> Self {
        let mut seen = HashSet::with_capacity(models.len());
        let models = models
            .into_iter()
            .filter(|m| {
                let fresh = seen.insert(m.id.clone());
                if !fresh {
                    tracing::warn!(model_id = %m.id, "Duplicate model id in listing, ignoring");
                }
                fresh
            })
            .collect();

        Self {
            models,
            fetched_at: Some(Utc::now()),
        }
    }

    /// Snapshot used before the first successful fetch
    pub fn empty() -> Self {
        Self {
            models: Vec::new(),
            fetched_at: None,
        }
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn get(&self, id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// None until the first successful fetch
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }
}

/// Snapshots compare by content; fetch time is ignored
impl PartialEq for RegistrySnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.models == other.models
    }
}

#[derive(Debug)]
struct RegistryState {
    snapshot: Arc<RegistrySnapshot>,
    last_error: Option<String>,
}

/// Holder of the current snapshot and the outcome of the latest fetch
pub struct Registry {
    state: RwLock<RegistryState>,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    pub fn new() -> Self {
        // Capacity of 64 is plenty; lagging subscribers only miss notifications
        let (event_tx, _) = broadcast::channel(64);

        Self {
            state: RwLock::new(RegistryState {
                snapshot: Arc::new(RegistrySnapshot::empty()),
                last_error: None,
            }),
            event_tx,
        }
    }

    /// Subscribe to refresh events
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// Current snapshot (cheap clone)
    pub async fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.state.read().await.snapshot.clone()
    }

    /// Error from the latest fetch, if it failed
    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Model> {
        self.state.read().await.snapshot.get(id).cloned()
    }

    /// Atomically install a freshly fetched listing
    pub async fn replace(&self, models: Vec<Model>) -> Arc<RegistrySnapshot> {
        let next = Arc::new(RegistrySnapshot::new(models));

        let mut state = self.state.write().await;
        for model in next.models() {
            if let Some(prev) = state.snapshot.get(&model.id)
                && !prev.status.can_transition_to(model.status)
            {
                tracing::debug!(
                    model_id = %model.id,
                    from = %prev.status,
                    to = %model.status,
                    "Observed status change outside the usual lifecycle"
                );
            }
        }
        state.snapshot = next.clone();
        state.last_error = None;
        drop(state);

        tracing::debug!(count = next.len(), "Registry snapshot replaced");
        crate::metrics::update_model_count(next.len());

        // Notify listeners of the refresh
        let _ = self
            .event_tx
            .send(RegistryEvent::Refreshed { count: next.len() });

        next
    }

    /// Record a failed fetch; the previous snapshot stays visible
    pub async fn mark_failed(&self, error: impl Into<String>) {
        let error = error.into();
        self.state.write().await.last_error = Some(error.clone());

        tracing::warn!(error = %error, "Registry refresh failed, keeping stale snapshot");

        let _ = self.event_tx.send(RegistryEvent::RefreshFailed { error });
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Engine, ModelStatus, UsageType};

    fn model(id: &str, name: &str) -> Model {
        let now = Utc::now();
        Model {
            id: id.to_string(),
            name: name.to_string(),
            engine: Engine::Vllm,
            usage_type: UsageType::Embedding,
            status: ModelStatus::Running,
            created_at: now,
            updated_at: now,
            container_id: Some(format!("c-{}", id)),
            image: None,
            port: Some(8000),
            gpu_id: None,
        }
    }

    #[test]
    fn test_snapshot_dedups_ids() {
        let snapshot = RegistrySnapshot::new(vec![
            model("a", "first"),
            model("b", "other"),
            model("a", "second"),
        ]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a").unwrap().name, "first");
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_snapshot_equality_ignores_fetch_time() {
        let models = vec![model("a", "x")];
        let first = RegistrySnapshot::new(models.clone());
        let second = RegistrySnapshot::new(models);
        assert_eq!(first, second);
        assert!(RegistrySnapshot::empty().fetched_at().is_none());
    }

    #[tokio::test]
    async fn test_replace_and_get() {
        let registry = Registry::new();
        assert!(registry.snapshot().await.is_empty());

        registry.replace(vec![model("a", "x"), model("b", "y")]).await;
        assert_eq!(registry.snapshot().await.len(), 2);
        assert_eq!(registry.get("b").await.unwrap().name, "y");
        assert!(registry.get("zzz").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_snapshot() {
        let registry = Registry::new();
        registry.replace(vec![model("a", "x")]).await;

        registry.mark_failed("connection refused").await;
        assert_eq!(registry.snapshot().await.len(), 1);
        assert_eq!(
            registry.last_error().await.as_deref(),
            Some("connection refused")
        );

        registry.replace(vec![model("a", "x")]).await;
        assert!(registry.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_events_broadcast() {
        let registry = Registry::new();
        let mut events = registry.subscribe_events();

        registry.replace(vec![model("a", "x")]).await;
        registry.mark_failed("timeout").await;

        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Refreshed { count: 1 }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::RefreshFailed {
                error: "timeout".to_string()
            }
        );
    }
}
