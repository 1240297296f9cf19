//! Orchestration of process-oriented diagnostics (PODs) over model output.
//!
//! A run resolves a configuration from the command line and a settings file,
//! selects the PODs to execute, validates the case list, and then runs every
//! POD of every case in order as an external process. The crate is split:
//!
//! - **[`core`]**: Pure logic (path versioning, POD selection, case merging,
//!   bidirectional name maps). No I/O.
//! - **[`io`]**: Side-effecting operations (settings and descriptor files,
//!   directories, scratch space, child processes).
//!
//! Orchestration modules ([`configure`], [`orchestrate`], [`session`],
//! [`info`]) coordinate core logic with I/O to implement CLI commands.

pub mod configure;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod info;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
