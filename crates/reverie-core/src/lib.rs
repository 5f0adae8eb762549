//! Shared types, configuration, and trait interfaces used across every
//! reverie subsystem crate: the data model, the config loader, and the
//! LLM/channel seams that storage, memory, relations, gardener, scheduler,
//! and proactive all depend on without depending on each other.

pub mod channel;
pub mod config;
pub mod error;
pub mod ids;
pub mod llm;
pub mod types;

pub use config::ReverieConfig;
pub use error::{ReverieError, Result};
pub use ids::{Id, UserId};
