//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. Filesystem existence checks
//! and the like are injected by the callers in [`crate::io`].

pub mod case;
pub mod jsonc;
pub mod multimap;
pub mod selection;
pub mod types;
pub mod version;
