//! Execution engine seam.
//!
//! The coordinator never looks inside a run; it hands the engine an
//! [`ExecutionContext`] and forwards whatever outcome comes back.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::{
    coordinator::Classification,
    request::{OwnerId, Request},
    Result,
};

/// Everything an engine needs to perform one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub request: Request,
    pub owner_id: OwnerId,
    /// Working copy the run must operate in
    pub workdir: PathBuf,
    /// Branch this run targets. For isolated runs this is the work branch
    /// checked out in `workdir`; direct runs use the primary working copy
    /// as it stands, whatever it has checked out.
    pub branch: String,
    /// How the run was admitted (never `Queued`)
    pub classification: Classification,
}

/// Performs the actual work of a request.
///
/// Implementations report their own failures as
/// [`Error::ExecutionFailed`](crate::Error::ExecutionFailed). The future
/// may be dropped mid-flight when the run is terminated, so anything it
/// spawns must die with it.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<()>;
}
