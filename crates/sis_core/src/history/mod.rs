//! Commit history.

mod commit;
mod diff;

pub use commit::{CommitLogger, CommitRecord, StoreCommitLogger};
pub use diff::{diff, diff_objects};
