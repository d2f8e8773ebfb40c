//! Fleet controller
//!
//! Orchestrates the registry, selection, dispatchers and container watches on
//! top of a [`ModelGateway`]. Every successful mutating command is followed by
//! exactly one full refresh; the controller never patches model records
//! locally.

use crate::config::ClientConfig;
use crate::container::ContainerWatcher;
use crate::dispatch::{self, BulkFailure, BulkOutcome};
use crate::error::{FleetError, FleetResult};
use crate::gateway::ModelGateway;
use crate::logs::{self, LogSlice};
use crate::model::{ContainerInfo, Engine, Model, ModelStatus, StartConfig, UsageType};
use crate::poller::{self, PollState, PollSubscription};
use crate::probe::{self, TestRun};
use crate::registry::{Registry, RegistryEvent, RegistrySnapshot};
use crate::selection::SelectionSet;
use crate::status::{ModelAction, StartupWatchdog, ensure_allowed, expected_status_after};
use crate::view::{self, FleetFilter, FleetPage, FleetRow, Page, SortState};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::Instant;

/// A start request the gateway accepted but no listing has shown yet
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStart {
    pub name: String,
    pub engine: Engine,
    pub usage_type: UsageType,
    /// Gateway timestamps at or after this mark the new model
    pub submitted_at: DateTime<Utc>,
    submitted: Instant,
}

impl PendingStart {
    /// Whether `model` is the instance this start created
    ///
    /// Names are not unique, so an older model with the same name and engine
    /// does not count.
    pub fn is_listed_as(&self, model: &Model) -> bool {
        model.name == self.name
            && model.engine == self.engine
            && model.created_at >= self.submitted_at
    }
}

/// Ids about to be removed, awaiting operator confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalPlan {
    ids: Vec<String>,
}

impl RemovalPlan {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record the operator's approval
    pub fn confirm(self) -> ConfirmedRemoval {
        ConfirmedRemoval { ids: self.ids }
    }
}

/// Removal approved by the operator; the only input `bulk_remove` accepts
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedRemoval {
    ids: Vec<String>,
}

pub struct FleetController<G: ModelGateway + 'static> {
    gateway: Arc<G>,
    registry: Arc<Registry>,
    selection: Mutex<SelectionSet>,
    watchdog: Mutex<StartupWatchdog>,
    pending: Mutex<Vec<PendingStart>>,
    containers: ContainerWatcher<G>,
    config: ClientConfig,
}

impl<G: ModelGateway + 'static> FleetController<G> {
    /// Must be called inside a Tokio runtime
    pub fn new(gateway: G, config: ClientConfig) -> Self {
        Self::with_gateway(Arc::new(gateway), config)
    }

    pub fn with_gateway(gateway: Arc<G>, config: ClientConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let containers =
            ContainerWatcher::new(gateway.clone(), &registry, config.container_poll_interval());

        Self {
            gateway,
            registry,
            selection: Mutex::new(SelectionSet::new()),
            watchdog: Mutex::new(StartupWatchdog::new(config.startup_timeout())),
            pending: Mutex::new(Vec::new()),
            containers,
            config,
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe_events()
    }

    pub async fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.registry.snapshot().await
    }

    async fn call<T>(&self, request: impl Future<Output = FleetResult<T>>) -> FleetResult<T> {
        let timeout = self.config.request_timeout();
        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| FleetError::Timeout {
                secs: timeout.as_secs(),
            })?
    }

    /// Fetch the full fleet and install it as the new snapshot
    ///
    /// On failure the previous snapshot stays in place and the error is
    /// recorded on the registry.
    pub async fn refresh(&self) -> FleetResult<Arc<RegistrySnapshot>> {
        let models = match self.call(self.gateway.list_models()).await {
            Ok(models) => models,
            Err(e) => {
                self.registry.mark_failed(e.to_string()).await;
                return Err(e);
            }
        };

        let snapshot = self.registry.replace(models).await;

        for model in snapshot.models().iter().filter(|m| !m.is_reconciled()) {
            tracing::debug!(model_id = %model.id, "Running model has no container yet");
        }

        self.watchdog.lock().await.observe(snapshot.models());

        let timeout = self.config.startup_timeout();
        self.pending.lock().await.retain(|pending| {
            if snapshot.models().iter().any(|m| pending.is_listed_as(m)) {
                return false;
            }
            let expired = pending.submitted.elapsed() > timeout;
            if expired {
                tracing::warn!(name = %pending.name, "Started model never appeared in listing");
            }
            !expired
        });

        Ok(snapshot)
    }

    /// Refresh after a successful command; a failure here is only logged
    async fn reconcile(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "Refresh after command failed");
        }
    }

    /// Status used for display and action gating
    pub async fn display_status(&self, model: &Model) -> ModelStatus {
        self.watchdog.lock().await.display_status(model)
    }

    /// Submit a start request
    ///
    /// The new model usually appears only on a later refresh; until then it is
    /// listed under [`FleetController::pending_starts`].
    pub async fn start(&self, config: StartConfig) -> FleetResult<()> {
        config.validate()?;

        let submitted_at = Utc::now();
        let submitted = Instant::now();
        let result = self.call(self.gateway.start_model(&config)).await;
        crate::metrics::record_command("start", result.is_ok());

        if let Err(e) = result {
            tracing::error!(name = %config.name, error = %e, "Start request failed");
            return Err(e);
        }

        tracing::info!(
            name = %config.name,
            engine = %config.engine,
            usage = %config.usage_type,
            "Start request accepted"
        );

        self.pending.lock().await.push(PendingStart {
            name: config.name,
            engine: config.engine,
            usage_type: config.usage_type,
            submitted_at,
            submitted,
        });

        self.reconcile().await;
        Ok(())
    }

    pub async fn pending_starts(&self) -> Vec<PendingStart> {
        self.pending.lock().await.clone()
    }

    pub async fn stop(&self, id: &str) -> FleetResult<()> {
        self.command(id, ModelAction::Stop).await
    }

    pub async fn restart(&self, id: &str) -> FleetResult<()> {
        self.command(id, ModelAction::Restart).await
    }

    pub async fn remove(&self, id: &str) -> FleetResult<()> {
        self.command(id, ModelAction::Remove).await
    }

    async fn command(&self, id: &str, action: ModelAction) -> FleetResult<()> {
        let model = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| FleetError::NotFound { id: id.to_string() })?;

        // Legality is checked before anything goes over the wire
        let status = self.display_status(&model).await;
        ensure_allowed(&model, status, action)?;

        let request = match action {
            ModelAction::Stop => self.gateway.stop_model(id),
            ModelAction::Restart => self.gateway.restart_model(id),
            ModelAction::Remove => self.gateway.remove_model(id),
        };
        let result = self.call(request).await;
        crate::metrics::record_command(action.as_str(), result.is_ok());

        match result {
            Ok(()) => {
                tracing::info!(
                    model_id = %id,
                    action = %action,
                    expected = ?expected_status_after(action),
                    "Command accepted"
                );
                self.reconcile().await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(model_id = %id, action = %action, error = %e, "Command failed");
                Err(e)
            }
        }
    }

    /// Prepare removal of `ids`; nothing happens until the plan is confirmed
    pub fn plan_removal<I, S>(&self, ids: I) -> FleetResult<RemovalPlan>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(FleetError::EmptyBatch);
        }
        Ok(RemovalPlan { ids })
    }

    /// Prepare removal of the selected models that still exist
    pub async fn plan_selected_removal(&self) -> FleetResult<RemovalPlan> {
        let snapshot = self.snapshot().await;
        let ids = self.selection.lock().await.resolve(&snapshot);
        self.plan_removal(ids)
    }

    /// Remove every confirmed id concurrently and refresh once afterwards
    ///
    /// Ids missing from the snapshot are skipped without a remote call, as are
    /// ids whose status forbids removal (reported as failures). The selection
    /// is cleared either way; selection mode is left only on full success.
    pub async fn bulk_remove(&self, confirmed: ConfirmedRemoval) -> FleetResult<BulkOutcome> {
        let snapshot = self.snapshot().await;
        let mut outcome = BulkOutcome::default();
        let mut targets = Vec::new();

        {
            let watchdog = self.watchdog.lock().await;
            for id in confirmed.ids {
                let Some(model) = snapshot.get(&id) else {
                    outcome.skipped.push(id);
                    continue;
                };
                let status = watchdog.display_status(model);
                match ensure_allowed(model, status, ModelAction::Remove) {
                    Ok(()) => targets.push(id),
                    Err(error) => outcome.failed.push(BulkFailure { id, error }),
                }
            }
        }

        if !targets.is_empty() {
            let gateway = self.gateway.clone();
            let remote = dispatch::dispatch_all(targets, self.config.request_timeout(), |id| {
                let gateway = gateway.clone();
                async move { gateway.remove_model(&id).await }
            })
            .await?;

            outcome.succeeded.extend(remote.succeeded);
            outcome.failed.extend(remote.failed);
            outcome.skipped.extend(remote.skipped);
        }

        crate::metrics::record_bulk_failures("remove", outcome.failed.len());

        {
            let mut selection = self.selection.lock().await;
            if outcome.is_success() {
                selection.exit();
            } else {
                selection.clear();
            }
        }

        if outcome.is_success() {
            tracing::info!(removed = outcome.succeeded.len(), "Bulk remove completed");
        } else {
            tracing::error!(
                failed = outcome.failed.len(),
                summary = %outcome.summary(),
                "Bulk remove partially failed"
            );
        }

        self.reconcile().await;
        Ok(outcome)
    }

    /// Filtered, sorted page of the current snapshot
    pub async fn view(&self, filter: &FleetFilter, sort: SortState, page: Page) -> FleetPage {
        let snapshot = self.snapshot().await;
        let rows = {
            let watchdog = self.watchdog.lock().await;
            let selection = self.selection.lock().await;
            snapshot
                .models()
                .iter()
                .map(|model| FleetRow {
                    model: model.clone(),
                    display_status: watchdog.display_status(model),
                    stalled: watchdog.is_stalled(&model.id),
                    selected: selection.contains(&model.id),
                })
                .collect()
        };

        view::project(rows, filter, sort, page)
    }

    /// Container log lines, sliced Python-style
    pub async fn logs(
        &self,
        id: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> FleetResult<LogSlice> {
        let lines = self.call(self.gateway.logs(id)).await?;
        Ok(logs::slice_lines(lines, start, end))
    }

    /// Running models of `usage` that can take a test prompt
    pub async fn test_candidates(&self, usage: UsageType) -> Vec<Model> {
        let snapshot = self.snapshot().await;
        let watchdog = self.watchdog.lock().await;
        snapshot
            .models()
            .iter()
            .filter(|m| m.usage_type == usage)
            .filter(|m| watchdog.display_status(m) == ModelStatus::Running)
            .cloned()
            .collect()
    }

    /// Send `prompt` to every listed model at once
    ///
    /// Ids that no longer exist are ignored.
    pub async fn run_tests<I, S>(&self, ids: I, prompt: &str) -> FleetResult<TestRun>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let snapshot = self.snapshot().await;
        let models: Vec<Model> = ids
            .into_iter()
            .filter_map(|id| snapshot.get(id.as_ref()).cloned())
            .collect();

        let run = probe::run_tests(
            self.gateway.as_ref(),
            &models,
            prompt,
            self.config.request_timeout(),
        )
        .await?;

        tracing::info!(
            targets = run.len(),
            succeeded = run.succeeded_count(),
            "Test run completed"
        );
        Ok(run)
    }

    pub async fn selection(&self) -> SelectionSet {
        self.selection.lock().await.clone()
    }

    pub async fn enter_selection(&self) {
        self.selection.lock().await.enter();
    }

    pub async fn exit_selection(&self) {
        self.selection.lock().await.exit();
    }

    pub async fn select(&self, id: &str) {
        self.selection.lock().await.select(id);
    }

    pub async fn deselect(&self, id: &str) {
        self.selection.lock().await.deselect(id);
    }

    /// Returns whether `id` is now selected
    pub async fn toggle_selected(&self, id: &str) -> bool {
        self.selection.lock().await.toggle(id)
    }

    /// Select or clear every model on the given page
    pub async fn toggle_page(&self, page: &FleetPage) {
        self.selection
            .lock()
            .await
            .toggle_all(page.rows.iter().map(|r| r.model.id.as_str()));
    }

    /// Start (or join) the container-info poll for `id`
    pub fn watch_container(&self, id: &str) -> watch::Receiver<PollState<ContainerInfo>> {
        self.containers.watch(id)
    }

    pub fn unwatch_container(&self, id: &str) -> bool {
        self.containers.unwatch(id)
    }

    pub fn containers(&self) -> &ContainerWatcher<G> {
        &self.containers
    }

    /// Refresh the registry every `every` until the subscription is dropped
    pub fn spawn_auto_refresh(
        self: &Arc<Self>,
        every: Duration,
    ) -> PollSubscription<Arc<RegistrySnapshot>> {
        let controller = Arc::downgrade(self);
        poller::start("registry", every, move || {
            let controller = controller.upgrade();
            async move {
                match controller {
                    Some(controller) => controller.refresh().await,
                    None => Err(FleetError::gateway("fleet controller dropped")),
                }
            }
        })
    }
}
