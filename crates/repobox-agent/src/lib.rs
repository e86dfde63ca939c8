//! The AI agent adapter (4.D): spawns the configured AI CLI, streams its
//! output into the session's output sink, and enforces an output line cap
//! and a deadline. Never itself commits, pushes, or touches git.

pub mod backend;

pub use backend::{Agent, AgentConfig, ExecuteRequest};
