//! The TrackTags concurrency core.
//!
//! Every tracked metric lives in its own task (a *unit*) keyed by scope and
//! metric name. Units are spawned only by their tenant's coordinator, and
//! tenant coordinators only by the root coordinator. The [`Engine`] facade
//! wires these together around a shared [`Registry`].

mod ask;
pub mod directory;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod registry;
pub mod root;
mod scheduler;
pub mod tenant;
pub mod unit;

pub use directory::{Directory, DirectoryEntry};
pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use error::{EngineError, NotifyError};
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use notify::{BreachNotifier, StoreUsageSink, UsageSink};
pub use registry::{MetricDirectoryReader, Registry};
pub use root::RootHandle;
pub use tenant::TenantHandle;
pub use unit::{MetricHandle, MetricSnapshot};
