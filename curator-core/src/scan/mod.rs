//! Candidate discovery: directory walking and filesystem watching.
//!
//! Neither side performs stability or ledger checks; those belong to the
//! pipeline's admission and stability stages.

mod scanner;
mod watch;

pub use scanner::{matches_ignore_pattern, MediaScanner};
pub use watch::DirectoryWatcher;
