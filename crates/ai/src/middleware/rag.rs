//! Retrieval-augmented generation: inject retrieved document excerpts
//! into the conversation before the completion call.
//!
//! Retrieval is best-effort by design. Any failure here degrades to "no
//! context" and never fails the user-visible request.

use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;

use crate::{
    messages::{ChatMessage, ChatRole},
    middleware::{context_insert_index, last_user_message},
};

/// Per-excerpt character budget in the injected system message.
const CHUNK_EXCERPT_CHARS: usize = 500;

/// External retrieval provider the middleware consumes.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Fetch up to `limit` chunks ranked by relevance to the query.
    async fn search(&self, query: &str, user_id: &str, limit: usize) -> anyhow::Result<Vec<RetrievedChunk>>;
}

/// One ranked chunk returned by a retriever.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content: String,
    pub source: Option<String>,
    pub score: f32,
}

/// Context assembled for one request. Built fresh per request and never
/// persisted here; persistence is the retriever's business.
#[derive(Debug, Clone, Default)]
pub struct RagContext {
    pub query: String,
    pub chunks: Vec<String>,
    /// Parallel to `chunks`, same length.
    pub relevance_scores: Vec<f32>,
    /// Deduplicated, in first-seen order.
    pub sources: Vec<String>,
}

pub struct RagMiddleware {
    retriever: Arc<dyn Retriever>,
}

impl RagMiddleware {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }

    /// Whether retrieval should run at all for this conversation.
    pub fn should_apply_rag(messages: &[ChatMessage], use_knowledge_base: bool) -> bool {
        use_knowledge_base && !messages.is_empty() && messages.iter().any(|m| m.role == ChatRole::User)
    }

    /// Augment the conversation with retrieved context.
    ///
    /// Returns the input unchanged when retrieval does not apply, finds
    /// nothing, or fails.
    pub async fn process(
        &self,
        messages: Vec<ChatMessage>,
        user_id: &str,
        max_context_chunks: usize,
    ) -> Vec<ChatMessage> {
        let Some(query) = last_user_message(&messages).map(|m| m.content.clone()) else {
            return messages;
        };

        let hits = match self.retriever.search(&query, user_id, max_context_chunks).await {
            Ok(hits) => hits,
            Err(e) => {
                log::warn!("knowledge base search failed, continuing without context: {e}");
                return messages;
            }
        };

        let context = build_context(&query, &hits, max_context_chunks);

        if context.chunks.is_empty() {
            log::debug!("no relevant context found for query");
            return messages;
        }

        let mut messages = messages;
        let index = context_insert_index(&messages);
        messages.insert(index, ChatMessage::system(render_context_message(&context)));

        log::debug!(
            "injected {} context chunks from {} sources",
            context.chunks.len(),
            context.sources.len()
        );

        messages
    }
}

/// Assemble a [`RagContext`] from retriever hits, splitting composite
/// documents and capping the chunk count.
fn build_context(query: &str, hits: &[RetrievedChunk], max_context_chunks: usize) -> RagContext {
    let mut context = RagContext {
        query: query.to_string(),
        ..RagContext::default()
    };

    for hit in hits {
        let parsed = parse_chunks(&hit.content);

        let sub_chunks = if parsed.chunks.is_empty() {
            vec![hit.content.trim().to_string()]
        } else {
            parsed.chunks
        };

        for chunk in sub_chunks {
            if context.chunks.len() == max_context_chunks {
                break;
            }
            if chunk.is_empty() {
                continue;
            }
            context.chunks.push(chunk);
            context.relevance_scores.push(hit.score);
        }

        let hit_sources = hit.source.iter().cloned().chain(parsed.sources);
        for source in hit_sources {
            if !context.sources.contains(&source) {
                context.sources.push(source);
            }
        }
    }

    context
}

/// Parsed form of a marker-formatted document.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ParsedDocument {
    pub chunks: Vec<String>,
    pub sources: Vec<String>,
}

/// Line-oriented chunk parser for documents the retriever returns as one
/// marker-formatted blob.
///
/// Lines starting with `---`, `###` or `**` open a new chunk; subsequent
/// non-empty lines accumulate into the current chunk until the next
/// marker. Lines prefixed `Source:` or `Reference:` collect sources
/// instead of content.
pub(crate) fn parse_chunks(text: &str) -> ParsedDocument {
    let mut document = ParsedDocument::default();
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(source) = trimmed
            .strip_prefix("Source:")
            .or_else(|| trimmed.strip_prefix("Reference:"))
        {
            let source = source.trim();
            if !source.is_empty() {
                document.sources.push(source.to_string());
            }
            continue;
        }

        let is_marker = trimmed.starts_with("---") || trimmed.starts_with("###") || trimmed.starts_with("**");

        if is_marker {
            if let Some(lines) = current.take() {
                push_chunk(&mut document.chunks, &lines);
            }
            current = Some(Vec::new());
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        if let Some(lines) = current.as_mut() {
            lines.push(trimmed);
        }
    }

    if let Some(lines) = current.take() {
        push_chunk(&mut document.chunks, &lines);
    }

    document
}

fn push_chunk(chunks: &mut Vec<String>, lines: &[&str]) {
    if !lines.is_empty() {
        chunks.push(lines.join("\n"));
    }
}

/// Render the context system message: numbered, trimmed excerpts plus a
/// citation line.
fn render_context_message(context: &RagContext) -> String {
    let excerpts = context
        .chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let excerpt: String = chunk.chars().take(CHUNK_EXCERPT_CHARS).collect();
            format!("{}. {}", i + 1, excerpt)
        })
        .join("\n\n");

    let citations = if context.sources.is_empty() {
        "No specific sources available".to_string()
    } else {
        context.sources.join(", ")
    };

    format!(
        "Use the following retrieved context to answer the user's question \
         when it is relevant:\n\n{excerpts}\n\nSources: {citations}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticRetriever(Vec<RetrievedChunk>);

    #[async_trait]
    impl Retriever for StaticRetriever {
        async fn search(&self, _query: &str, _user_id: &str, limit: usize) -> anyhow::Result<Vec<RetrievedChunk>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct FailingRetriever;

    #[async_trait]
    impl Retriever for FailingRetriever {
        async fn search(&self, _query: &str, _user_id: &str, _limit: usize) -> anyhow::Result<Vec<RetrievedChunk>> {
            anyhow::bail!("vector store unreachable")
        }
    }

    fn chunk(content: &str, source: Option<&str>) -> RetrievedChunk {
        RetrievedChunk {
            content: content.into(),
            source: source.map(Into::into),
            score: 0.9,
        }
    }

    #[test]
    fn should_apply_requires_flag_and_user_message() {
        let messages = vec![ChatMessage::user("question")];
        assert!(RagMiddleware::should_apply_rag(&messages, true));
        assert!(!RagMiddleware::should_apply_rag(&messages, false));
        assert!(!RagMiddleware::should_apply_rag(&[], true));

        let no_user = vec![ChatMessage::system("sys"), ChatMessage::assistant("hi")];
        assert!(!RagMiddleware::should_apply_rag(&no_user, true));
    }

    #[tokio::test]
    async fn injects_context_after_leading_system_message() {
        let middleware = RagMiddleware::new(Arc::new(StaticRetriever(vec![chunk(
            "Paris is the capital of France.",
            Some("geography.md"),
        )])));

        let messages = vec![
            ChatMessage::system("You are helpful."),
            ChatMessage::user("What is the capital of France?"),
        ];

        let result = middleware.process(messages, "user-1", 5).await;

        assert_eq!(result.len(), 3);
        assert_eq!(result[1].role, ChatRole::System);
        assert!(result[1].content.contains("1. Paris is the capital of France."));
        assert!(result[1].content.contains("Sources: geography.md"));
    }

    #[tokio::test]
    async fn inserts_at_front_without_system_message() {
        let middleware = RagMiddleware::new(Arc::new(StaticRetriever(vec![chunk("fact", None)])));

        let result = middleware.process(vec![ChatMessage::user("q")], "user-1", 5).await;

        assert_eq!(result[0].role, ChatRole::System);
        assert!(result[0].content.contains("No specific sources available"));
    }

    #[tokio::test]
    async fn retrieval_failure_returns_messages_unchanged() {
        let middleware = RagMiddleware::new(Arc::new(FailingRetriever));

        let messages = vec![ChatMessage::user("q")];
        let result = middleware.process(messages.clone(), "user-1", 5).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].content, "q");
    }

    #[tokio::test]
    async fn chunk_count_is_capped() {
        let hits = (0..10).map(|i| chunk(&format!("fact {i}"), None)).collect();
        let middleware = RagMiddleware::new(Arc::new(StaticRetriever(hits)));

        let result = middleware.process(vec![ChatMessage::user("q")], "user-1", 3).await;

        let context = &result[0].content;
        assert!(context.contains("3. fact 2"));
        assert!(!context.contains("4. "));
    }

    #[test]
    fn parses_marker_formatted_documents() {
        let text = "### Overview\nFirst chunk line one.\nLine two.\n\n\
                    Source: handbook.pdf\n\
                    --- \nSecond chunk.\n\
                    Reference: wiki/page\n\
                    ** Note\nThird chunk.";

        let parsed = parse_chunks(text);

        assert_eq!(
            parsed.chunks,
            vec![
                "First chunk line one.\nLine two.".to_string(),
                "Second chunk.".to_string(),
                "Third chunk.".to_string(),
            ]
        );
        assert_eq!(parsed.sources, vec!["handbook.pdf", "wiki/page"]);
    }

    #[test]
    fn unmarked_text_yields_no_chunks() {
        let parsed = parse_chunks("just a plain paragraph");
        assert!(parsed.chunks.is_empty());
        assert!(parsed.sources.is_empty());
    }

    #[test]
    fn sources_deduplicate_in_order() {
        let hits = vec![
            chunk("a", Some("one.md")),
            chunk("b", Some("two.md")),
            chunk("c", Some("one.md")),
        ];

        let context = build_context("q", &hits, 5);

        assert_eq!(context.sources, vec!["one.md", "two.md"]);
        assert_eq!(context.chunks.len(), context.relevance_scores.len());
    }
}
