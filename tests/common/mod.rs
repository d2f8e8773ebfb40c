//! In-memory model gateway shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use model_fleet::{
    ContainerInfo, Engine, FleetError, FleetResult, Model, ModelGateway, ModelStatus, StartConfig,
    UsageType,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Which gateway operation a failure is injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Stop,
    Restart,
    Remove,
    Test,
    Container,
}

/// Gateway double that mutates an in-memory fleet
///
/// Stop/restart/remove change the stored models the way a real gateway would,
/// so a follow-up listing reflects accepted commands.
#[derive(Default)]
pub struct FakeGateway {
    models: Mutex<Vec<Model>>,
    failures: Mutex<HashMap<(Op, String), FleetError>>,
    latency: Mutex<HashMap<String, Duration>>,
    fail_list: Mutex<Option<FleetError>>,
    next_id: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub remote_calls: AtomicUsize,
    pub started: Mutex<Vec<StartConfig>>,
    pub tested: Mutex<HashSet<String>>,
}

impl FakeGateway {
    pub fn with_models(models: Vec<Model>) -> Self {
        let gateway = Self::default();
        *gateway.models.lock().unwrap() = models;
        gateway
    }

    /// Make `op` on `id` fail with `error`
    pub fn fail(&self, op: Op, id: &str, error: FleetError) {
        self.failures
            .lock()
            .unwrap()
            .insert((op, id.to_string()), error);
    }

    pub fn fail_listing(&self, error: Option<FleetError>) {
        *self.fail_list.lock().unwrap() = error;
    }

    /// Delay every call that targets `id`
    pub fn delay(&self, id: &str, latency: Duration) {
        self.latency.lock().unwrap().insert(id.to_string(), latency);
    }

    pub fn set_status(&self, id: &str, status: ModelStatus) {
        if let Some(model) = self.models.lock().unwrap().iter_mut().find(|m| m.id == id) {
            model.status = status;
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.models
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> usize {
        self.remote_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: Op, id: &str) -> FleetResult<()> {
        let latency = self.latency.lock().unwrap().get(id).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let injected = self
            .failures
            .lock()
            .unwrap()
            .get(&(op, id.to_string()))
            .cloned();
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn find(&self, id: &str) -> FleetResult<Model> {
        self.models
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound { id: id.to_string() })
    }
}

#[async_trait]
impl ModelGateway for FakeGateway {
    async fn list_models(&self) -> FleetResult<Vec<Model>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_list.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.models.lock().unwrap().clone())
    }

    async fn start_model(&self, config: &StartConfig) -> FleetResult<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(config.clone());

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut created = model(
            &format!("new-{}", n),
            &config.name,
            ModelStatus::Starting,
            config.engine,
            config.usage_type,
            1000,
        );
        created.created_at = Utc::now();
        created.updated_at = created.created_at;
        created.gpu_id = config.gpu_id.clone();
        self.models.lock().unwrap().push(created);
        Ok(())
    }

    async fn stop_model(&self, id: &str) -> FleetResult<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(Op::Stop, id).await?;
        self.find(id)?;
        self.set_status(id, ModelStatus::Stopped);
        Ok(())
    }

    async fn restart_model(&self, id: &str) -> FleetResult<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(Op::Restart, id).await?;
        self.find(id)?;
        self.set_status(id, ModelStatus::Starting);
        Ok(())
    }

    async fn remove_model(&self, id: &str) -> FleetResult<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(Op::Remove, id).await?;
        self.find(id)?;
        self.models.lock().unwrap().retain(|m| m.id != id);
        Ok(())
    }

    async fn logs(&self, id: &str) -> FleetResult<Vec<String>> {
        self.find(id)?;
        Ok((1..=20).map(|i| format!("[{}] line {}", id, i)).collect())
    }

    async fn container_info(&self, id: &str) -> FleetResult<ContainerInfo> {
        self.enter(Op::Container, id).await?;
        let model = self.find(id)?;
        Ok(ContainerInfo {
            container_id: model.container_id,
            image: model.image,
            port: model.port,
            gpu_id: model.gpu_id,
            engine: model.engine,
        })
    }

    async fn test_model(&self, id: &str, prompt: &str) -> FleetResult<serde_json::Value> {
        self.enter(Op::Test, id).await?;
        let model = self.find(id)?;
        self.tested.lock().unwrap().insert(id.to_string());

        Ok(match model.usage_type {
            UsageType::Generation => json!({
                "success": true,
                "message": format!("{} says: {}", model.name, prompt),
            }),
            UsageType::Embedding => json!({
                "success": true,
                "embeddings": [(0..384).map(|i| i as f64 / 384.0).collect::<Vec<f64>>()],
            }),
        })
    }
}

/// Build a model record; `minutes` offsets the creation time
pub fn model(
    id: &str,
    name: &str,
    status: ModelStatus,
    engine: Engine,
    usage_type: UsageType,
    minutes: i64,
) -> Model {
    let created =
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + ChronoDuration::minutes(minutes);
    let running = status == ModelStatus::Running;
    Model {
        id: id.to_string(),
        name: name.to_string(),
        engine,
        usage_type,
        status,
        created_at: created,
        updated_at: created,
        container_id: running.then(|| format!("ctr-{}", id)),
        image: running.then(|| match engine {
            Engine::Ollama => "ollama/ollama:latest".to_string(),
            Engine::Vllm => "vllm/vllm-openai:latest".to_string(),
        }),
        port: running.then_some(8000),
        gpu_id: Some("0".to_string()),
    }
}

pub fn running(id: &str, usage_type: UsageType) -> Model {
    model(id, &format!("model-{}", id), ModelStatus::Running, Engine::Ollama, usage_type, 0)
}
