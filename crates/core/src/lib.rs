//! # Quarry Core
//!
//! Domain types, traits, and error definitions for the Quarry research engine.
//! This crate has **no transport or vendor dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping providers and knowledge backends via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod knowledge;
pub mod source;
pub mod research;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, GenerationError, KnowledgeError, ProviderError, Result, ToolError};
pub use message::{ChatMessage, ChatRole, Message, MessageToolCall, Role};
pub use provider::{
    FinishReason, ModelConfig, Provider, ProviderRequest, ProviderResponse, ResponseFormat,
    ToolDefinition, Usage,
};
pub use tool::{CapabilityResult, IntentDraft, QueryResults, Tool, ToolCallRecord, ToolContext, ToolRegistry};
pub use knowledge::{
    ChatSession, KnowledgeAnswer, KnowledgeSearchResult, KnowledgeService, NotebookChatMessage,
    NotebookContext, SearchRequest, SearchType, WebSearchResult, WebSearchService,
};
pub use source::{LocationType, SourceLocation, SourceReference, SourceType};
pub use research::{ModelOverrides, ResearchQuery, ResearchResponse, ToolCallSummary};
pub use event::{DomainEvent, EventBus};
