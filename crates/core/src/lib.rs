//! # Chatloom Core
//!
//! Domain types, traits, and error definitions for the Chatloom streaming
//! chat engine. This crate has **no transport dependencies**: it defines the
//! message model and the collaborator traits that the provider, tool and
//! agent crates implement against.
//!
//! ## Collaborators
//!
//! - [`Provider`]: a chat-completion endpoint (whole-response or streamed)
//! - [`ModelResolver`]: picks an alternate model id for the fallback ladder
//! - [`ToolProvider`]: one capability the model may invoke, held in a [`ToolRegistry`]

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{EngineError, ProviderError, Result, ToolError};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{
    ChunkReceiver, ModelResolver, Provider, ProviderRequest, ProviderResponse, StreamChunk,
    ToolCallDelta, ToolChoice, ToolDefinition, Usage,
};
pub use tool::{ToolProvider, ToolRegistry};
