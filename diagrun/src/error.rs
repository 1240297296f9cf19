//! Typed error kinds that callers need to tell apart.
//!
//! Orchestration code wraps these in `anyhow::Error` with context; use
//! `downcast_ref` to recover the kind.

use std::path::PathBuf;

/// Fatal configuration problems. The run stops before any POD is dispatched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "no PODs selected to be run (received --pods = {requested:?}); \
         run `diagrun info pods` for a list of available PODs"
    )]
    NoPodsSelected { requested: Vec<String> },
    #[error("no valid entries in case_list ({received} received); please specify model run information")]
    NoValidCases { received: usize },
    #[error("required directory {} not found", .0.display())]
    MissingDirectory(PathBuf),
    #[error("{} exists but is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

/// Failures of variable-name translation and convention registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslationError {
    #[error("variable name translation doesn't recognize convention {0}")]
    UnknownConvention(String),
    #[error("name {name} not defined for convention {convention}")]
    NameNotFound { name: String, convention: String },
    #[error("convention {name} defined in {} already exists", .path.display())]
    DuplicateConvention { name: String, path: PathBuf },
}

/// Contract violations of the scratch-directory registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TempDirError {
    #[error("temp dir {} is already registered", .0.display())]
    AlreadyRegistered(PathBuf),
    #[error("temp dir {} is not registered", .0.display())]
    NotRegistered(PathBuf),
    #[error("temp dir key {0:?} must be a single path component")]
    InvalidKey(String),
}

/// Dispatcher lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown environment_manager {key:?} (known: {})", .known.join(", "))]
    UnknownEnvironmentManager { key: String, known: Vec<String> },
}
