// src/chat/mod.rs
// Per-turn orchestration: retrieve, assemble, stream, execute tools, loop,
// score and persist. One in-flight assistant turn per session.

mod registry;
mod stream;

pub use registry::TaskRegistry;
pub use stream::{FinalizedTurn, StreamAccumulator, StreamAction};

use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::ws::frames::{FrameQueue, MessageSnapshot, ServerFrame, ToolName};
use crate::api::ws::frames::MAX_CONTENT_CHARS;
use crate::context::{AssemblyConfig, ContextAssembler};
use crate::db::{MessageStore, ModelCatalog, NewMessage, RagMetadata, UsageEvent, UsageRecorder};
use crate::error::{LoupeError, Result};
use crate::llm::{CompletionRequest, ProviderAdapter, ToolCall};
use crate::quality::{ConfidenceService, ScoringContext};
use crate::search::{Hit, HybridSearch};
use crate::settings::SettingsService;
use crate::tools::{DEFAULT_TOOL_TIMEOUT, ToolOutcome, ToolRegistry, ToolRuntime};

/// Maximum assistant/tool rounds per turn
pub const MAX_TOOL_ROUNDS: usize = 3;
/// Retrieval candidate pool handed to the assembler
const RETRIEVAL_CANDIDATES: usize = 15;
/// History window pulled per turn
const HISTORY_WINDOW: i64 = 50;
/// Inter-frame yield keeping the writer responsive
const FRAME_YIELD: Duration = Duration::from_millis(1);

const DEFAULT_SYSTEM_PROMPT: &str = "You are a code-aware assistant for this project. \
Ground answers in the provided context; say when the context does not cover the question.";

pub struct ChatOrchestrator {
    pool: PgPool,
    messages: MessageStore,
    search: Arc<HybridSearch>,
    assembler: ContextAssembler,
    adapter: Arc<ProviderAdapter>,
    tools: Arc<ToolRegistry>,
    settings: Arc<SettingsService>,
    catalog: Arc<ModelCatalog>,
    pub registry: Arc<TaskRegistry>,
    usage: Option<UsageRecorder>,
    repo_root: PathBuf,
}

impl ChatOrchestrator {
    pub fn new(
        pool: PgPool,
        messages: MessageStore,
        search: Arc<HybridSearch>,
        assembler: ContextAssembler,
        adapter: Arc<ProviderAdapter>,
        tools: Arc<ToolRegistry>,
        settings: Arc<SettingsService>,
        catalog: Arc<ModelCatalog>,
        usage: Option<UsageRecorder>,
        repo_root: PathBuf,
    ) -> Self {
        Self {
            pool,
            messages,
            search,
            assembler,
            adapter,
            tools,
            settings,
            catalog,
            registry: Arc::new(TaskRegistry::new()),
            usage,
            repo_root,
        }
    }

    pub fn message_store(&self) -> &MessageStore {
        &self.messages
    }

    /// Entry point for one user turn. Failures become error frames;
    /// cancellation is silent.
    pub async fn handle_turn(&self, session_id: i64, content: String, frames: &FrameQueue) {
        let cancel = self.registry.token_for(session_id);
        match self.run_turn(session_id, content, frames, cancel).await {
            Ok(()) => {}
            Err(LoupeError::Cancelled) => {
                info!(session_id, "Turn cancelled; partial output discarded");
            }
            Err(e) => {
                warn!(session_id, "Turn failed: {}", e);
                frames.push(ServerFrame::Error {
                    error: e.to_string(),
                    code: Some(e.code().to_string()),
                });
            }
        }
    }

    async fn run_turn(
        &self,
        session_id: i64,
        content: String,
        frames: &FrameQueue,
        cancel: CancellationToken,
    ) -> Result<()> {
        if content.trim().is_empty() {
            return Err(LoupeError::Validation("message content is empty".into()));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(LoupeError::Validation(format!(
                "message exceeds {} characters",
                MAX_CONTENT_CHARS
            )));
        }

        let session = self
            .messages
            .get_session(session_id)
            .await?
            .ok_or_else(|| LoupeError::Validation(format!("unknown session {}", session_id)))?;
        let project_ids = vec![session.project_id];

        let user_message = self.messages.append(NewMessage::user(session_id, &content)).await?;
        let placeholder_id = user_message.id;

        // Resolve the active configuration and model limits
        let config = self.settings.get_current().await;
        let model = config.model_id.clone();
        let context_window = self.catalog.context_window(&model).await;
        let max_response = config
            .max_tokens
            .unwrap_or(self.catalog.max_output_tokens(&model).await)
            .min(context_window / 2);
        let reasoning = self.catalog.is_reasoning_model(&model).await;

        // Retrieve; a failing retriever degrades the turn, never aborts it
        let (hits, retrieval_error) = match self
            .search
            .search(&content, &project_ids, None, RETRIEVAL_CANDIDATES, None)
            .await
        {
            Ok(hits) => (hits, None),
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {}", e);
                (Vec::new(), Some(e.to_string()))
            }
        };

        // History excludes the turn being answered
        let history: Vec<_> = self
            .messages
            .recent(session_id, HISTORY_WINDOW)
            .await?
            .into_iter()
            .filter(|m| m.id != user_message.id)
            .collect();

        let mut assembly = AssemblyConfig::new(
            config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            context_window,
            max_response,
        );
        assembly.developer_role_for_system = reasoning && config.use_responses_api;

        let assembled = self.assembler.assemble(&content, &history, &hits, &assembly).await;
        let referenced_chunks = assembled.referenced_chunks.clone();
        let mut conversation = assembled.messages;

        let tool_runtime = ToolRuntime {
            pool: self.pool.clone(),
            search: self.search.clone(),
            adapter: self.adapter.clone(),
            repo_root: self.repo_root.clone(),
            project_ids,
        };

        let supports_tools =
            !self.tools.is_empty() && self.catalog.supports_functions(&model).await;
        let (provider, _) = self.adapter.active().await;

        // Stream begin with the placeholder id
        frames.push(ServerFrame::stream_delta(placeholder_id, ""));

        let mut full_text = String::new();
        let mut executed_calls: Vec<ToolCall> = Vec::new();

        for round in 0..MAX_TOOL_ROUNDS {
            // Tools are offered on every round but the last
            let include_tools = supports_tools && round + 1 < MAX_TOOL_ROUNDS;

            let mut request = CompletionRequest::new(conversation.clone());
            request.temperature = config.temperature;
            request.max_tokens = Some(max_response);
            request.top_p = config.top_p;
            request.frequency_penalty = config.frequency_penalty;
            request.presence_penalty = config.presence_penalty;
            if include_tools {
                request = request.with_tools(self.tools.definitions());
                request.parallel_tool_calls = Some(true);
            }

            let mut rx = self.adapter.stream(request).await?;
            let mut accumulator = StreamAccumulator::new();

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return Err(LoupeError::Cancelled),
                    event = rx.recv() => event,
                };
                let Some(event) = event else {
                    break;
                };
                for action in accumulator.apply(event) {
                    match action {
                        StreamAction::EmitText(delta) => {
                            frames.push(ServerFrame::stream_delta(placeholder_id, delta));
                            tokio::time::sleep(FRAME_YIELD).await;
                        }
                        StreamAction::EmitToolStarted { name } => {
                            frames.push(ServerFrame::AiToolCall {
                                message_id: placeholder_id,
                                tool_name: name,
                                status: "started".into(),
                            });
                        }
                        StreamAction::Completed => {}
                        StreamAction::Failed(message) => {
                            return Err(LoupeError::Other(message));
                        }
                    }
                }
                if accumulator.is_completed() {
                    break;
                }
            }

            let turn = accumulator.finalize();
            if let (Some(recorder), Some(usage)) = (&self.usage, turn.usage) {
                let mut event = UsageEvent::chat(&model, &provider.to_string());
                event.input_tokens = usage.input_tokens as i64;
                event.output_tokens = usage.output_tokens as i64;
                recorder.record_detached(event);
            }

            full_text.push_str(&turn.content);

            if turn.has_tool_calls() && round + 1 < MAX_TOOL_ROUNDS {
                frames.push(ServerFrame::stream_done(placeholder_id, true, None));
                frames.push(ServerFrame::AiToolsExecuting {
                    message_id: placeholder_id,
                    tool_count: turn.tool_calls.len(),
                    tools: turn
                        .tool_calls
                        .iter()
                        .map(|c| ToolName { name: c.name.clone() })
                        .collect(),
                });

                // The assistant's tool request precedes its outputs
                conversation.push(crate::llm::ChatMessage::assistant_with_tool_calls(
                    (!turn.content.is_empty()).then(|| turn.content.clone()),
                    turn.tool_calls.clone(),
                ));

                let outcomes = tokio::select! {
                    _ = cancel.cancelled() => return Err(LoupeError::Cancelled),
                    outcomes = self.execute_tools(&turn.tool_calls, &tool_runtime) => outcomes,
                };
                for (call, outcome) in turn.tool_calls.iter().zip(outcomes) {
                    conversation.push(crate::llm::ChatMessage::tool_result(
                        call.id.clone(),
                        outcome.to_message_content(),
                    ));
                }
                executed_calls.extend(turn.tool_calls);
                continue;
            }

            // Final round: score, persist, close out the stream
            let confidence =
                ConfidenceService::calculate_rag_confidence(&hits, &ScoringContext::default());
            let status = ConfidenceService::degradation_status(
                confidence,
                &hits,
                retrieval_error.as_deref(),
            );

            let persisted = self
                .messages
                .append(NewMessage {
                    session_id,
                    role: crate::db::MessageRole::Assistant,
                    content: full_text.clone(),
                    rag: RagMetadata {
                        rag_used: !hits.is_empty(),
                        rag_confidence: (!hits.is_empty()).then_some(confidence),
                        knowledge_sources_count: hits.len() as i32,
                        rag_status: status,
                        referenced_chunks,
                    },
                    tool_calls: executed_calls,
                })
                .await?;

            frames.push(ServerFrame::stream_done(
                placeholder_id,
                !persisted.tool_calls.as_array().map(Vec::is_empty).unwrap_or(true),
                Some(MessageSnapshot {
                    id: persisted.id,
                    content: persisted.content,
                    role: persisted.role,
                    created_at: persisted.created_at,
                }),
            ));
            info!(
                session_id,
                message_id = persisted.id,
                rounds = round + 1,
                sources = hits.len(),
                confidence,
                "Turn complete"
            );
            return Ok(());
        }

        Ok(())
    }

    /// Execute a round's tool calls in parallel, each under its own timeout.
    /// Failures come back as outcomes, never as errors.
    async fn execute_tools(
        &self,
        calls: &[ToolCall],
        runtime: &ToolRuntime,
    ) -> Vec<ToolOutcome> {
        let futures = calls.iter().map(|call| {
            self.tools
                .execute(&call.name, &call.arguments, runtime, DEFAULT_TOOL_TIMEOUT)
        });
        futures::future::join_all(futures).await
    }

    /// Fetch quality hits for a standalone scoring request (feedback API).
    pub fn score_hits(hits: &[Hit]) -> (f64, crate::db::RagStatus) {
        let confidence = ConfidenceService::calculate_rag_confidence(hits, &ScoringContext::default());
        (
            confidence,
            ConfidenceService::degradation_status(confidence, hits, None),
        )
    }
}
