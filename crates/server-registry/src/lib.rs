//! Game server registry.
//!
//! Maintains a live registry of the game servers of one title. Addresses are
//! discovered from a master directory, probed on a bounded worker pool, and
//! reconciled into an online/offline state machine with a miss-count
//! threshold. Long-offline records are aged out by the reaper.
//!
//! # Components
//!
//! - **Poller**: periodic single-flight discovery, feeds the dispatcher
//! - **Dispatcher**: batches addresses into probe tasks on the queue
//! - **Worker pool**: probes tasks and emits one Hit or Miss per address
//! - **Reconciler**: applies outcomes to the store, serialized per address
//! - **Reaper**: periodic bulk deletion of expired offline records
//!
//! ```text
//! Poller ──► Dispatcher ──► TaskQueue ──► ProbePool ──► Reconciler ──► Store
//!                                                                      ▲
//! Reaper ──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod http_server;
pub mod metrics;
pub mod poller;
pub mod queue;
pub mod reaper;
pub mod reconciler;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod worker;

pub use config::{Config, ConfigError};
pub use directory::{DirectoryError, MasterDirectory, SteamWebDirectory};
pub use dispatcher::{DispatchBatcher, DispatchSummary};
pub use http_server::MetricsServer;
pub use metrics::MetricsRegistry;
pub use poller::{DiscoveryPoller, PollReport};
pub use queue::{ChannelQueue, NackOutcome, QueueError, TaskQueue};
pub use reaper::Reaper;
pub use reconciler::{ProbeOutcome, StateReconciler, Transition};
pub use server::{Dependencies, RegistryServer, RunningServer};
pub use store::{MemoryStore, RegistryStore, SqliteStore, StoreError};
pub use telemetry::{TelemetryGuard, TracingOptions, setup_tracing};
pub use types::{PipelineConfig, ProbeTask, RetryPolicy, ServerCandidate, ServerRecord, Status};
pub use worker::{PoolHandle, ProbePool};
