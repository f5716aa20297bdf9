//! Conclave local pipeline runner.
//!
//! Each participant process owns one [`LocalRunnerPool`]: it serializes
//! execution to a single in-flight run, drives the run's pipeline steps
//! sequentially against local data, publishes the client's contribution to
//! the shared remote-result database, and waits for the merged terminal
//! result to come back through replication.
//!
//! [`kickoff`] is the entry sequence: fetch the consortium and computation
//! documents (under the replication-lag retry budget), create the canonical
//! remote-result document if this client is the initiator (the participant
//! at position 0 of the declared client list) or wait for it to appear
//! otherwise, then trigger the runner.

mod error;
mod kickoff;
mod pool;
mod wait;

pub use error::{KickoffError, RunnerError};
pub use kickoff::{KickoffConfig, kickoff};
pub use pool::{LOCAL_RUN_STATES_DB, LOCAL_RUNS_DB, LocalRunnerPool, PoolConfig, PoolState};
pub use wait::{WaitConfig, WaitError, wait_for_remote_result};
