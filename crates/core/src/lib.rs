// crates/core/src/lib.rs
//! Core library for claude-recall: session memory, repo snapshots, and the
//! building blocks the hook binaries share.
//!
//! Everything here is synchronous. Hook invocations are fresh short-lived
//! processes, so there is no server loop and no shared in-process state;
//! external tools are probed lazily and every subprocess call carries an
//! explicit timeout.

pub mod brain;
pub mod gitignore;
pub mod io;
pub mod llm;
pub mod paths;
pub mod proc;
pub mod scan;
pub mod snapshot;
pub mod transcript;

pub use gitignore::Gitignore;
pub use scan::Scanner;
pub use snapshot::{create_snapshot, RepoSnapshot};
