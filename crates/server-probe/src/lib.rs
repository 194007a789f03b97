//! Game server probing and classification.
//!
//! This crate provides the per-server side of the registry pipeline:
//! - The [`ProbeClient`] contract for one query exchange against a server
//! - [`TimedProbe`], which bounds every attempt with an overall deadline
//! - Tag normalization into a canonical [`TagSet`]
//! - The gamemode [`classify`] function
//!
//! # Example
//!
//! ```no_run
//! use server_probe::{TimedProbe, WebApiProbeClient, classify_metadata};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(WebApiProbeClient::new(None, "STEAM_KEY".to_string())?);
//! let probe = TimedProbe::new(client, Duration::from_millis(5000));
//!
//! let attempt = probe.attempt("203.0.113.7:27015".parse()?).await;
//! if let Ok(metadata) = &attempt.outcome {
//!     println!("{} is playing {}", metadata.name, classify_metadata(metadata));
//! }
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod client;
pub mod steam;
pub mod tags;
pub mod types;

pub use classifier::{classify, classify_metadata};
pub use client::{ProbeClient, TimedProbe, WebApiProbeClient, ATTEMPT_GRACE};
pub use tags::TagSet;
pub use types::{Gamemode, PlayerInfo, ProbeAttempt, ProbeError, RawTags, ServerMetadata};
