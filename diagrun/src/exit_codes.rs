//! Stable exit codes for diagrun CLI commands.

/// Run completed (individual POD failures included) or info was printed.
pub const OK: i32 = 0;
/// Fatal configuration error: no PODs selected, no valid cases, a missing
/// required directory, or any other failure before PODs are dispatched.
pub const CONFIG: i32 = 1;
/// Interrupted by SIGINT/SIGTERM; scratch directories were cleaned up.
pub const INTERRUPTED: i32 = 130;
