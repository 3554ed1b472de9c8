//! Autonomous side of gitward: watch a working tree, group changes into
//! debounced change sets and run them one at a time through the workflow
//! engine.

pub mod agent;
pub mod debounce;
pub mod fingerprint;
pub mod watcher;

pub use agent::AutonomousAgent;
