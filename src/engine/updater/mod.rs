//! Certificate Transparency Log List Updater
//!
//! A verified, crash-consistent update pipeline for CT log lists.
//!
//! Components:
//! - `store` - Durable key/value bookkeeping
//! - `compat` - Compatibility version channels
//! - `state` - Per-version stored state and phases
//! - `verify` - ED25519 signature verification
//! - `download` - Fetch, verify and parse log lists
//! - `install` - Atomic publication to the CT consumer
//! - `policy` - Eligibility and backoff
//! - `scheduler` - Periodic trigger
//! - `logger` - Outcome telemetry
//! - `job` - Orchestration

pub mod clock;
pub mod compat;
pub mod download;
pub mod install;
pub mod job;
pub mod logger;
pub mod policy;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod verify;

pub use compat::CompatibilityVersion;
pub use download::{DownloadError, Downloader, Fetcher, HttpFetcher, LogListArtifact};
pub use install::{DirectoryInstaller, LogListInstaller};
pub use job::{CycleOutcome, UpdateJob, UpdateJobDeps};
pub use policy::UpdatePolicy;
pub use state::{StoredState, UpdatePhase};
pub use store::PersistentStore;
pub use verify::{SignatureError, SignatureVerifier};
