//! DocStream - job orchestration core for document processing
//!
//! This library schedules document conversion jobs across a pool of worker
//! tasks: tiered backlogs, admission control under memory pressure,
//! load-balanced assignment, circuit-breaker-protected extraction calls,
//! retry with exponential backoff, and crash recovery of in-flight jobs.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides a simplified facade:
//!
//! ```ignore
//! use docstream::service::Orchestrator;
//! use docstream::config::Settings;
//! use docstream::job::Plan;
//!
//! let orchestrator = Orchestrator::new(Settings::default(), extractor, store, events);
//! let service = orchestrator.service();
//!
//! tokio::spawn(orchestrator.run(shutdown_token));
//!
//! let mut handle = service.submit_job(payload, "owner-1", Plan::Premium)?;
//! let status = handle.wait().await;
//! ```

pub mod balancer;
pub mod breaker;
pub mod cluster;
pub mod config;
pub mod events;
pub mod extract;
pub mod job;
pub mod logging;
pub mod memory;
pub mod pool;
pub mod queue;
pub mod recovery;
pub mod service;
pub mod store;
pub mod time;

/// Version of the DocStream library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
