//! Model Fleet - client-side state sync for inference model fleets
//!
//! Keeps a local view of the models and containers managed by a remote model
//! gateway, polls it on fixed intervals, gates operator actions by model status
//! and fans out bulk and test operations across many models at once.

pub mod config;
pub mod container;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod logs;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod probe;
pub mod registry;
pub mod selection;
pub mod status;
pub mod view;

pub use config::ClientConfig;
pub use container::ContainerWatcher;
pub use controller::{ConfirmedRemoval, FleetController, PendingStart, RemovalPlan};
pub use dispatch::{BulkFailure, BulkOutcome, dispatch_all};
pub use error::{FleetError, FleetResult};
pub use gateway::{HttpGateway, ModelGateway};
pub use model::{ContainerInfo, Engine, Model, ModelStatus, StartConfig, StartParameters, UsageType};
pub use poller::{PollHandle, PollState, PollSubscription};
pub use probe::{ExpandedResults, TestPayload, TestResult, TestRun};
pub use registry::{Registry, RegistryEvent, RegistrySnapshot};
pub use selection::SelectionSet;
pub use status::{ModelAction, StartupWatchdog};
pub use view::{FleetFilter, FleetPage, FleetRow, Page, SortDirection, SortKey, SortState};
