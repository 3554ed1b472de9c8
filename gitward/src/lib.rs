//! Branch-safe git workflow automation.
//!
//! Keeps every change off protected branches while driving an unattended
//! branch, commit, push and pull request pipeline.
//!
//! - **[`core`]**: Pure, deterministic logic (policy, naming, messages,
//!   classification, retry arithmetic). No I/O.
//! - **[`io`]**: Side-effecting adapters (git, `gh`, hooks, config, run
//!   records) behind traits so tests can substitute fakes.
//!
//! Orchestration lives in [`branch`] (policy-checked branch operations) and
//! [`engine`] (the workflow state machine).

pub mod branch;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
