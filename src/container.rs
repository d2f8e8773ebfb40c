//! Per-model container info subscriptions

use crate::gateway::ModelGateway;
use crate::model::ContainerInfo;
use crate::poller::{self, PollState, PollSubscription};
use crate::registry::{Registry, RegistryEvent};
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

type Subscriptions = DashMap<String, PollSubscription<ContainerInfo>>;

/// Keeps one container-info poll running per watched model
///
/// Subscriptions for models that drop out of the registry are cancelled on the
/// next refresh. Dropping the watcher cancels everything it owns.
pub struct ContainerWatcher<G: ModelGateway + 'static> {
    gateway: Arc<G>,
    every: Duration,
    subscriptions: Arc<Subscriptions>,
}

impl<G: ModelGateway + 'static> ContainerWatcher<G> {
    pub fn new(gateway: Arc<G>, registry: &Arc<Registry>, every: Duration) -> Self {
        let subscriptions = Arc::new(DashMap::new());

        // Listener holds weak refs so it never keeps the watcher or registry alive
        tokio::spawn(prune_on_refresh(
            registry.subscribe_events(),
            Arc::downgrade(registry),
            Arc::downgrade(&subscriptions),
        ));

        Self {
            gateway,
            every,
            subscriptions,
        }
    }

    /// Start watching `id`, or join the existing subscription
    pub fn watch(&self, id: &str) -> watch::Receiver<PollState<ContainerInfo>> {
        self.subscriptions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(model_id = %id, "Watching container info");
                let gateway = self.gateway.clone();
                let target = id.to_string();
                poller::start(format!("container:{}", id), self.every, move || {
                    let gateway = gateway.clone();
                    let target = target.clone();
                    async move { gateway.container_info(&target).await }
                })
            })
            .subscribe()
    }

    /// Stop watching `id`; returns whether it was watched
    pub fn unwatch(&self, id: &str) -> bool {
        match self.subscriptions.remove(id) {
            Some((_, subscription)) => {
                subscription.cancel();
                tracing::debug!(model_id = %id, "Stopped watching container info");
                true
            }
            None => false,
        }
    }

    /// Keep only subscriptions whose id passes `keep`
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        self.subscriptions.retain(|id, subscription| {
            let kept = keep(id);
            if !kept {
                subscription.cancel();
            }
            kept
        });
    }

    pub fn unwatch_all(&self) {
        self.retain(|_| false);
    }

    pub fn state(&self, id: &str) -> Option<PollState<ContainerInfo>> {
        self.subscriptions.get(id).map(|s| s.current())
    }

    pub fn is_watching(&self, id: &str) -> bool {
        self.subscriptions.contains_key(id)
    }

    pub fn watched(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl<G: ModelGateway + 'static> Drop for ContainerWatcher<G> {
    fn drop(&mut self) {
        tracing::debug!("ContainerWatcher dropped, cancelling subscriptions");
        self.unwatch_all();
    }
}

async fn prune_on_refresh(
    mut events: broadcast::Receiver<RegistryEvent>,
    registry: Weak<Registry>,
    subscriptions: Weak<Subscriptions>,
) {
    loop {
        match events.recv().await {
            Ok(RegistryEvent::Refreshed { .. }) | Err(broadcast::error::RecvError::Lagged(_)) => {
                let (Some(registry), Some(subscriptions)) =
                    (registry.upgrade(), subscriptions.upgrade())
                else {
                    break;
                };

                let snapshot = registry.snapshot().await;
                subscriptions.retain(|id, subscription| {
                    let present = snapshot.contains(id);
                    if !present {
                        subscription.cancel();
                        tracing::debug!(model_id = %id, "Model gone, dropping container watch");
                    }
                    present
                });
            }
            Ok(RegistryEvent::RefreshFailed { .. }) => {
                // Stale snapshot; keep watching
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FleetError, FleetResult};
    use crate::model::{Engine, Model, ModelStatus, StartConfig, UsageType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct InfoGateway {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelGateway for InfoGateway {
        async fn list_models(&self) -> FleetResult<Vec<Model>> {
            Ok(Vec::new())
        }
        async fn start_model(&self, _config: &StartConfig) -> FleetResult<()> {
            Ok(())
        }
        async fn stop_model(&self, _id: &str) -> FleetResult<()> {
            Ok(())
        }
        async fn restart_model(&self, _id: &str) -> FleetResult<()> {
            Ok(())
        }
        async fn remove_model(&self, _id: &str) -> FleetResult<()> {
            Ok(())
        }
        async fn logs(&self, _id: &str) -> FleetResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn container_info(&self, id: &str) -> FleetResult<ContainerInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ContainerInfo {
                container_id: Some(format!("c-{}", id)),
                image: Some("ollama/ollama:latest".to_string()),
                port: Some(11434),
                gpu_id: None,
                engine: Engine::Ollama,
            })
        }
        async fn test_model(&self, id: &str, _prompt: &str) -> FleetResult<serde_json::Value> {
            Err(FleetError::NotFound { id: id.to_string() })
        }
    }

    fn model(id: &str) -> Model {
        let now = chrono::Utc::now();
        Model {
            id: id.to_string(),
            name: id.to_string(),
            engine: Engine::Ollama,
            usage_type: UsageType::Generation,
            status: ModelStatus::Running,
            created_at: now,
            updated_at: now,
            container_id: Some(format!("c-{}", id)),
            image: None,
            port: None,
            gpu_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_is_shared_per_model() {
        let gateway = Arc::new(InfoGateway::default());
        let registry = Arc::new(Registry::new());
        let watcher = ContainerWatcher::new(gateway.clone(), &registry, Duration::from_secs(5));

        watcher.watch("a");
        watcher.watch("a");
        sleep(Duration::from_millis(10)).await;

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        let state = watcher.state("a").unwrap();
        assert_eq!(state.data.unwrap().container_id.as_deref(), Some("c-a"));
        assert_eq!(watcher.watched(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwatch_stops_polling() {
        let gateway = Arc::new(InfoGateway::default());
        let registry = Arc::new(Registry::new());
        let watcher = ContainerWatcher::new(gateway.clone(), &registry, Duration::from_secs(5));

        watcher.watch("a");
        sleep(Duration::from_millis(10)).await;
        assert!(watcher.unwatch("a"));
        assert!(!watcher.unwatch("a"));

        sleep(Duration::from_secs(30)).await;
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_drops_vanished_models() {
        let gateway = Arc::new(InfoGateway::default());
        let registry = Arc::new(Registry::new());
        let watcher = ContainerWatcher::new(gateway, &registry, Duration::from_secs(5));

        registry.replace(vec![model("a"), model("b")]).await;
        watcher.watch("a");
        watcher.watch("b");

        registry.replace(vec![model("a")]).await;
        sleep(Duration::from_millis(10)).await;

        assert!(watcher.is_watching("a"));
        assert!(!watcher.is_watching("b"));
    }
}
