//! Conclave simulation harness.
//!
//! Boots one participant task per user declared in a decl file, speaks the
//! boot protocol with each (`Boot`/`Kickoff`/`Teardown` in,
//! `Ready`/`Toredown` out), seeds the shared databases, runs the remote
//! manager alongside the participants, and reports the merged result plus
//! every participant's final run record.
//!
//! Participants are tokio tasks wired up over message channels; everything
//! they share travels through the replicating document store, exactly as it
//! would between real processes.

mod client;
mod computations;
mod decl;
mod error;
mod harness;

pub use client::{ClientHandle, ClientMessage, ParentMessage, spawn_client};
pub use computations::{builtin, register_builtins};
pub use decl::{SimDecl, SimUser};
pub use error::SimError;
pub use harness::{SIM_CONSORTIUM_ID, SimulationOutcome, run_simulation, run_simulation_with};
