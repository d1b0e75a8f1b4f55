//! Agent orchestration
//!
//! The turn loop drives the LLM in streaming mode, dispatches tool calls,
//! and emits `AgentEvent`s so any front-end can render progress.

pub mod events;
pub mod runner;

pub use events::AgentEvent;
pub use runner::TurnLoop;
