//! Conclave coordination point.
//!
//! The [`RemotePipelineManager`] accepts a run-start request and watches the
//! run's remote-result database for contributions arriving through
//! replication. Once every declared participant has reported, it merges the
//! contribution set and writes the terminal result back through the same
//! shared-storage channel. [`PipelineHandle::result`] is the single-
//! resolution future for that outcome.
//!
//! The HTTP edge ([`router`]) exposes `POST /startPipeline` with a
//! fire-and-forget 201 acknowledgment; the merged result is delivered
//! asynchronously by the [`ResultsClient`] once the handle resolves.

mod error;
mod manager;
mod results;
mod server;

pub use error::{PipelineError, TransportError};
pub use manager::{ManagerConfig, PipelineHandle, RemotePipelineManager, StartPipelineRequest};
pub use results::{ResultsClient, ResultsConfig};
pub use server::{ServerContext, router, serve};
