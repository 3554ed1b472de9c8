//! Stable exit codes for the `gitward` and `gitward-agent` binaries.

/// Command succeeded; for `process`/`resume` this includes a run that
/// completed with a warning.
pub const OK: i32 = 0;
/// Policy violation, failed run, protected branch on `check`, or any other error.
pub const FAILED: i32 = 1;
