//! Conclave document model.
//!
//! Every database in the system holds exactly one document type; the shapes
//! here are the tagged schemas for those databases. Cross-participant state
//! only ever moves as serialized documents, so these types are the whole
//! contract between a client, its peers, and the remote manager.
//!
//! The [`Document`] trait is the identity/merge seam the store uses when two
//! replicas write the same document id concurrently. [`RemoteResult`] is the
//! only multi-writer document and merges contribution-wise rather than by
//! whole-document replacement.

mod computation;
mod document;
mod error;
mod result;
mod run;

pub use computation::{ComputationDescriptor, ComputationDoc, ConsortiumDoc};
pub use document::Document;
pub use error::RunError;
pub use result::{Contribution, MergeStatus, RemoteResult};
pub use run::{LocalRunState, PipelineSpec, Run, RunStatus, StepSpec};

/// Name of the database holding consortium documents.
pub const CONSORTIA_DB: &str = "consortia";

/// Name of the database holding computation documents.
pub const COMPUTATIONS_DB: &str = "computations";

/// Name of the shared remote-result database for a consortium.
pub fn remote_db_name(consortium_id: &str) -> String {
  format!("remote-consortium-{consortium_id}")
}
