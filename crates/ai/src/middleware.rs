//! Message-list transformers applied before the completion call.
//!
//! These are conversation middlewares, not web-framework middlewares:
//! each takes the message list and may insert or extend system messages.
//! The service applies them in a fixed order (RAG, then tools) because
//! both touch system messages and later transforms must not clobber
//! earlier ones.

pub(crate) mod cost;
pub(crate) mod rag;
pub(crate) mod tool;

pub use cost::{CostLimitCheck, CostLimits, CostMiddleware, CostRecord, CostSummary, CostTracker, DailyCost, ModelUsage};
pub use rag::{RagContext, RagMiddleware, RetrievedChunk, Retriever};
pub use tool::{ToolCall, ToolExecutionResult, ToolInfo, ToolMiddleware, ToolProvider};

use crate::messages::{ChatMessage, ChatRole};

/// Index at which a new context-bearing system message is inserted:
/// immediately after the first pre-existing system message, or at the
/// front if there is none. Providers treat the leading system message
/// specially, so this position is load-bearing.
pub(crate) fn context_insert_index(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .position(|m| m.role == ChatRole::System)
        .map(|i| i + 1)
        .unwrap_or(0)
}

/// Index of the last user message, scanning from the end.
pub(crate) fn last_user_message(messages: &[ChatMessage]) -> Option<&ChatMessage> {
    messages.iter().rev().find(|m| m.role == ChatRole::User)
}
