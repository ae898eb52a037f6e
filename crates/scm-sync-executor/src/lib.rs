//! The ten-phase sync executor protocol and the concrete GitLab/SVN
//! executors. `scm-sync-core` defines the stores this crate
//! drives; `scm-sync-postgres` implements them; this crate never touches a
//! database directly.

// Decision table and closed result type
pub mod decide;
pub mod result;

// Error taxonomy for this crate
pub mod errors;

// Remote collaborator contracts and typed upsert shapes
pub mod remote;
pub mod records;

// Window/diff helpers shared by the concrete executors
pub mod diff;
pub mod window;

// The executor trait, registry, and the driver that runs the ten phases
pub mod registry;
pub mod protocol;

// Concrete executors
pub mod gitlab_commits;
pub mod gitlab_mrs;
pub mod gitlab_reviews;
pub mod svn;

pub use decide::{decide_cursor_advance, CursorAdvanceDecision};
pub use errors::ExecutorError;
pub use protocol::{ExecutorDriver, RunJobRequest};
pub use registry::{ExecutionContext, ExecutorRegistry, ExecutorStores, JobExecutor, WindowOutcome};
pub use result::{ExecutorResult, ExecutorResultKind};

pub use gitlab_commits::GitLabCommitsExecutor;
pub use gitlab_mrs::GitLabMrsExecutor;
pub use gitlab_reviews::GitLabReviewsExecutor;
pub use svn::SvnRevisionsExecutor;
