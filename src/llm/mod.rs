// src/llm/mod.rs
// Model backend abstraction: one polymorphic capability (`ModelBackend`)
// selected by configuration, plus the JSON-from-text emulation decorator
// for backends without native function calling.

pub mod emulation;
pub mod provider;

pub use provider::{
    backend_from_config, BackendEvent, BackendRequest, BackendStream, ContentBlock, Message,
    ModelBackend, Role, TokenUsage,
};
