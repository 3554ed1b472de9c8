//! Side-effecting adapters: subprocesses, git, pull requests, hooks, config
//! and run persistence.

pub mod config;
pub mod git;
pub mod hooks;
pub mod pr;
pub mod process;
pub mod repo;
pub mod run_store;
pub mod time;
