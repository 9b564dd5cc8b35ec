//! Chat relay core: request routing and the Claude CLI streaming pipeline.

pub mod abort;
pub mod cli;
pub mod engine;
pub mod events;
pub mod executable;
pub mod executor;
pub mod router;
pub mod rules;
pub mod tools;
