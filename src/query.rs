//! Query answering: embed, retrieve, rerank, assemble context, generate.
//!
//! The pipeline is infallible from the caller's point of view: every
//! failure class maps to a user-facing degraded answer, and the sources
//! of the retrieved context are reported even when generation itself
//! fails.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingGateway;
use crate::error::CoreError;
use crate::generate::{GenerateError, GenerationClient, SamplingParams};
use crate::models::{Answer, SearchResult};
use crate::rerank::RerankService;
use crate::search::HybridSearchCoordinator;

const NO_MATCH_MESSAGE: &str =
    "I couldn't find any relevant information in your uploaded documents for that query.";

const NOT_READY_MESSAGE: &str = "Your document index is not set up yet. Please upload your \
     documents again once the system has finished initializing.";

const EMBED_DOWN_MESSAGE: &str = "I couldn't process your question right now because the \
     embedding service is unavailable. Please try again shortly.";

const GENERATION_TIMEOUT_MESSAGE: &str = "The answer took too long to generate. Please try \
     again, perhaps with a more specific question.";

const GENERATION_DOWN_MESSAGE: &str =
    "The language model service is currently unavailable. Please try again shortly.";

const GENERATION_ERROR_MESSAGE: &str =
    "Something went wrong while generating the answer. Please try again.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

pub struct QueryPipeline {
    gateway: Arc<EmbeddingGateway>,
    coordinator: Arc<HybridSearchCoordinator>,
    rerank: RerankService,
    generation: Arc<dyn GenerationClient>,
    retrieval: RetrievalConfig,
    sampling: SamplingParams,
}

impl QueryPipeline {
    pub fn new(
        gateway: Arc<EmbeddingGateway>,
        coordinator: Arc<HybridSearchCoordinator>,
        rerank: RerankService,
        generation: Arc<dyn GenerationClient>,
        retrieval: RetrievalConfig,
        sampling: SamplingParams,
    ) -> Self {
        Self {
            gateway,
            coordinator,
            rerank,
            generation,
            retrieval,
            sampling,
        }
    }

    /// Answer a question against one tenant's documents.
    /// `prior_summary` carries an optional summary of the previous
    /// conversation turn into the prompt.
    pub async fn answer(
        &self,
        tenant_id: &str,
        question: &str,
        prior_summary: Option<&str>,
    ) -> Answer {
        let query_vec = match self.gateway.embed_query(question).await {
            Ok(v) => v,
            Err(e) => {
                warn!(tenant = tenant_id, error = %e, "query embedding failed");
                return Answer {
                    answer: EMBED_DOWN_MESSAGE.to_string(),
                    sources: Vec::new(),
                };
            }
        };

        let hits = match self
            .coordinator
            .search(
                tenant_id,
                question,
                &query_vec,
                self.retrieval.candidate_limit,
                self.retrieval.vector_weight,
                self.retrieval.keyword_weight,
            )
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                if matches!(e.downcast_ref::<CoreError>(), Some(CoreError::StoreNotReady { .. })) {
                    warn!(tenant = tenant_id, error = %e, "search hit an unmigrated store");
                    return Answer {
                        answer: NOT_READY_MESSAGE.to_string(),
                        sources: Vec::new(),
                    };
                }
                error!(tenant = tenant_id, error = %e, "hybrid search failed");
                return Answer {
                    answer: GENERATION_ERROR_MESSAGE.to_string(),
                    sources: Vec::new(),
                };
            }
        };

        if hits.is_empty() {
            return Answer {
                answer: NO_MATCH_MESSAGE.to_string(),
                sources: Vec::new(),
            };
        }

        let reranked = self.rerank.apply(question, hits).await;
        let context_chunks: Vec<&SearchResult> = reranked
            .iter()
            .take(self.retrieval.context_chunks)
            .collect();
        let context = assemble_context(&context_chunks, self.retrieval.context_max_chars);
        let sources = unique_sources(&context_chunks);
        let prompt = build_prompt(question, &context, prior_summary);

        match self.generation.generate(&prompt, &self.sampling).await {
            Ok(text) => {
                info!(tenant = tenant_id, chunks = context_chunks.len(), "answer generated");
                Answer {
                    answer: text,
                    sources,
                }
            }
            Err(e) => {
                warn!(tenant = tenant_id, error = %e, "generation failed");
                let message = match e {
                    GenerateError::Timeout => GENERATION_TIMEOUT_MESSAGE,
                    GenerateError::Unreachable(_) => GENERATION_DOWN_MESSAGE,
                    GenerateError::Service(_) => GENERATION_ERROR_MESSAGE,
                };
                Answer {
                    answer: message.to_string(),
                    sources,
                }
            }
        }
    }
}

/// Join the top chunks with the separator, truncated to `max_chars`.
fn assemble_context(chunks: &[&SearchResult], max_chars: usize) -> String {
    let joined = chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    if joined.chars().count() > max_chars {
        joined.chars().take(max_chars).collect()
    } else {
        joined
    }
}

/// Distinct source filenames in context order.
fn unique_sources(chunks: &[&SearchResult]) -> Vec<String> {
    let mut sources = Vec::new();
    for chunk in chunks {
        if !sources.contains(&chunk.source_filename) {
            sources.push(chunk.source_filename.clone());
        }
    }
    sources
}

fn build_prompt(question: &str, context: &str, prior_summary: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant answering questions about the user's uploaded documents. \
         Answer using only the context below. If the context does not contain the answer, say so.\n\n",
    );
    if let Some(summary) = prior_summary.filter(|s| !s.trim().is_empty()) {
        prompt.push_str("Summary of the conversation so far:\n");
        prompt.push_str(summary);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Context:\n");
    prompt.push_str(context);
    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str("\n\nAnswer:");
    prompt
}
