//! # QETL
//!
//! Client SDK for building, submitting and monitoring QETL pipeline jobs.
//!
//! The SDK provides:
//!
//! - **Pipeline construction**: a fluent [`JobBuilder`](pipeline::JobBuilder) over named inputs,
//!   transformation steps with dependencies, and outputs
//! - **Validation**: duplicate names, unknown dependencies, dependency cycles and parameter ranges
//!   are caught before anything reaches a backend
//! - **Job monitoring**: a [`Job`](job::Job) handle with a checked state machine, capped exponential
//!   backoff polling, cancellation and completion callbacks
//! - **Pluggable backends**: anything implementing [`RunnerClient`](runner::RunnerClient), with an
//!   in-process [`LocalRunner`](runner::LocalRunner) and an HTTP `RemoteRunner`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qetl::prelude::*;
//! use std::time::Duration;
//!
//! # async fn run() -> qetl::Result<()> {
//! let client = QetlClient::new(ClientConfig::local())?;
//!
//! let job = client
//!     .create_job()
//!     .set_name("Drug Discovery")
//!     .add_input_source(InputSource::new("drug_data", "s3://bucket/compounds.csv"))?
//!     .add_wave_encoder("molecular_orbital", TransformOptions::named("encode"))?
//!     .add_quantum_homology_analyzer(3, "high", TransformOptions::new().with_dependency("encode"))?
//!     .add_output(OutputSpec::new("report", "results/report.json"))?
//!     .submit()
//!     .await?;
//!
//! let results = job.get_results(Duration::from_secs(600)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod job;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod testing;
pub mod utils;

pub use errors::{ConfigurationError, QetlError, Result, TransportError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::QetlClient;
    pub use crate::config::{ClientConfig, LocalConfig, Mode, RemoteConfig};
    pub use crate::errors::{ConfigurationError, QetlError, Result, TransportError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::job::{
        CompletionNotice, Job, JobResults, JobState, JobSummary, PollConfig, ResultsHandle,
        StatusSnapshot,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        ComponentInfo, ExecutionParams, InputSource, JobBuilder, OutputSpec, PipelineSpec, TransformOptions,
        TransformStep, ValidationIssue, ValidationIssueKind, ValidationResult,
    };
    pub use crate::runner::{
        DryRunExecutor, InstanceInfo, LocalRunner, PipelineExecutor, ProcessExecutor, RunnerClient,
    };
    #[cfg(feature = "remote")]
    pub use crate::runner::RemoteRunner;
}
