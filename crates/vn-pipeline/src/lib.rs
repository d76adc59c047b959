//! # vn-pipeline
//!
//! Classification and repair of video files.
//!
//! - **Analysis** ([`Prober`], [`Analysis`]) -- probe a file and record its
//!   structure.
//! - **Detection** ([`IssueDetector`]) -- compare the analysis against the
//!   compatibility policy.
//! - **Planning** ([`DecisionEngine`]) -- pick no-op, quick fix (remux) or full
//!   conversion (re-encode).
//! - **Repair** ([`Remuxer`], [`Transcoder`], [`Verifier`]) -- produce and
//!   check the output.
//! - **Orchestration** ([`Normalizer`], [`WorkerPool`]) -- the per-file state
//!   machine and the bounded pool that runs many files at once.

pub mod analysis;
pub mod coordinator;
pub mod decision;
pub mod detect;
pub mod normalizer;
pub mod prober;
pub mod remux;
pub mod transcode;
pub mod verify;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use analysis::{Analysis, Resolution};
pub use coordinator::{BatchOutcome, JobHandle, NormalizeJob, WorkerPool};
pub use decision::{DecisionEngine, Plan};
pub use detect::{Issue, IssueDetector, IssueSet};
pub use normalizer::{JobState, JobTrace, NormalizeResult, Normalizer, Report};
pub use prober::Prober;
pub use remux::Remuxer;
pub use transcode::Transcoder;
pub use verify::Verifier;
