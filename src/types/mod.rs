// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod commit_hash;
mod id;

pub use commit_hash::{CommitHash, CommitHashError};
pub use id::{ApplicationId, DeploymentId, Id, StageId};
