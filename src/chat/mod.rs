#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::SinkExt;
use futures::channel::mpsc;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::context::{AssembledContext, ContextConfig, ContextDocument, assemble_context};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{
    Attachment, Course, Lecture, Message, MessageOwner, MessagePart, MessageRole, NewMessage,
};
use crate::generation::{ChatMessage, GenerationClient, GenerationEvent, with_turn_timeout};
use crate::transcript::concatenated_text;
use crate::{LecternError, Result};

/// One incoming chat turn. The message id is the client's idempotence key: a
/// retried request re-upserts the same user message instead of duplicating
/// it.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LecternError::Validation(
                "message id must not be empty".to_string(),
            ));
        }
        if self.message.trim().is_empty() {
            return Err(LecternError::Validation(
                "message text must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which conversation the turn belongs to.
#[derive(Debug, Clone)]
pub enum ChatScope {
    Lecture(Lecture),
    Course(Course),
}

impl ChatScope {
    fn owner_id(&self) -> &str {
        match self {
            ChatScope::Lecture(lecture) => &lecture.owner_id,
            ChatScope::Course(course) => &course.owner_id,
        }
    }
}

/// Turn lifecycle, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    ContextAssembled,
    Generating,
    Completed,
    Failed,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            TurnState::Received => "received",
            TurnState::ContextAssembled => "context_assembled",
            TurnState::Generating => "generating",
            TurnState::Completed => "completed",
            TurnState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Event relayed to the turn's subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Delta(String),
    Reasoning(String),
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    Done {
        message_id: String,
        context_tokens: usize,
    },
    Error(String),
}

/// Allow/deny access check for a conversation's owning resource.
#[async_trait]
pub trait OwnershipGuard: Send + Sync {
    async fn can_access(&self, user_id: &str, owner_id: &str) -> bool;
}

/// Default guard: only the resource owner may chat with it.
pub struct OwnerOnlyGuard;

#[async_trait]
impl OwnershipGuard for OwnerOnlyGuard {
    async fn can_access(&self, user_id: &str, owner_id: &str) -> bool {
        user_id == owner_id
    }
}

/// Executes model-requested tool calls during a turn.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, name: &str, arguments: &serde_json::Value) -> Result<String>;
}

/// Default runner: no tools are wired up, so every call is answered with an
/// unavailability notice the model can recover from.
pub struct NoopToolRunner;

#[async_trait]
impl ToolRunner for NoopToolRunner {
    async fn run(&self, name: &str, _arguments: &serde_json::Value) -> Result<String> {
        Ok(format!("The tool '{name}' is not available."))
    }
}

/// A validated turn with its prompt assembled, ready for generation.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    pub assistant_message_id: String,
    pub owner: MessageOwner,
    pub messages: Vec<ChatMessage>,
    pub context_tokens: usize,
}

/// Drives one chat turn end to end: validation, ownership, persistence,
/// context assembly, streaming generation, and the final assistant upsert.
#[derive(Clone)]
pub struct StreamCoordinator {
    database: Database,
    generation: GenerationClient,
    context_config: ContextConfig,
    generation_config: GenerationConfig,
    ownership: Arc<dyn OwnershipGuard>,
    tools: Arc<dyn ToolRunner>,
}

impl StreamCoordinator {
    pub fn new(
        database: Database,
        generation: GenerationClient,
        context_config: ContextConfig,
        generation_config: GenerationConfig,
        ownership: Arc<dyn OwnershipGuard>,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            database,
            generation,
            context_config,
            generation_config,
            ownership,
            tools,
        }
    }

    /// Run the pre-stream phase of a turn. Errors from here map directly to
    /// HTTP statuses; once this returns, the turn is committed to streaming.
    pub async fn prepare_turn(
        &self,
        user_id: &str,
        scope: ChatScope,
        request: ChatRequest,
    ) -> Result<PreparedTurn> {
        info!(state = %TurnState::Received, message_id = %request.id, "chat turn received");
        request.validate()?;

        if !self.ownership.can_access(user_id, scope.owner_id()).await {
            return Err(LecternError::Authorization(
                "caller does not own this conversation".to_string(),
            ));
        }

        let owner = match &scope {
            ChatScope::Lecture(lecture) => MessageOwner::Lecture(lecture.id.clone()),
            ChatScope::Course(course) => {
                let chat = self
                    .database
                    .get_or_create_chat(&course.id, &course.owner_id)
                    .await?;
                MessageOwner::Chat(chat.id)
            }
        };

        self.database
            .upsert_message(NewMessage {
                id: request.id.clone(),
                owner: owner.clone(),
                role: MessageRole::User,
                parts: vec![MessagePart::Text {
                    text: request.message.clone(),
                }],
                attachments: request.attachments.clone(),
            })
            .await?;

        let context = self.assemble_scope_context(&scope).await?;
        info!(
            state = %TurnState::ContextAssembled,
            message_id = %request.id,
            context_tokens = context.estimated_tokens,
            documents = context.included.len(),
            "chat context assembled"
        );

        let history = match &owner {
            MessageOwner::Lecture(id) => self.database.list_lecture_messages(id).await?,
            MessageOwner::Chat(id) => self.database.list_chat_messages(id).await?,
        };

        let mut messages = vec![ChatMessage::system(system_prompt(&context))];
        messages.extend(history_to_prompt(&history));

        Ok(PreparedTurn {
            assistant_message_id: Uuid::new_v4().to_string(),
            owner,
            messages,
            context_tokens: context.estimated_tokens,
        })
    }

    /// Build the transcript context for the turn's scope: the lecture's own
    /// transcript, or every lecture of the course with the lecture
    /// update times as the recency signal.
    async fn assemble_scope_context(&self, scope: &ChatScope) -> Result<AssembledContext> {
        let documents = match scope {
            ChatScope::Lecture(lecture) => {
                let segments = self.database.get_transcript(&lecture.id).await?;
                vec![ContextDocument {
                    identifier: lecture.id.clone(),
                    title: lecture.title.clone(),
                    text: concatenated_text(&segments),
                    recency: Utc.from_utc_datetime(&lecture.updated_at),
                }]
            }
            ChatScope::Course(course) => {
                let lectures = self.database.list_course_lectures(&course.id).await?;
                let mut documents = Vec::with_capacity(lectures.len());
                for lecture in lectures {
                    let segments = self.database.get_transcript(&lecture.id).await?;
                    documents.push(ContextDocument {
                        identifier: lecture.id.clone(),
                        title: lecture.title.clone(),
                        text: concatenated_text(&segments),
                        recency: Utc.from_utc_datetime(&lecture.updated_at),
                    });
                }
                documents
            }
        };

        let documents: Vec<ContextDocument> = documents
            .into_iter()
            .filter(|d| !d.text.trim().is_empty())
            .collect();

        Ok(assemble_context(&documents, &self.context_config))
    }

    /// Start streaming the prepared turn. The returned receiver yields turn
    /// events as they arrive; dropping it cancels the upstream generation
    /// request and the turn is recorded as failed with nothing persisted
    /// for the assistant.
    pub fn stream_turn(&self, prepared: PreparedTurn) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(32);
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.run_turn(prepared, tx).await;
        });
        rx
    }

    async fn run_turn(self, prepared: PreparedTurn, mut tx: mpsc::Sender<TurnEvent>) {
        let message_id = prepared.assistant_message_id.clone();
        info!(state = %TurnState::Generating, assistant_message_id = %message_id, "starting generation");

        match self.generate(prepared, &mut tx).await {
            Ok(Some(context_tokens)) => {
                info!(state = %TurnState::Completed, assistant_message_id = %message_id, "turn completed");
                let done = TurnEvent::Done {
                    message_id,
                    context_tokens,
                };
                if tx.send(done).await.is_err() {
                    debug!("subscriber left after completion");
                }
            }
            Ok(None) => {
                // Subscriber disconnected; dropping the generation stream
                // already aborted the upstream request.
                info!(state = %TurnState::Failed, assistant_message_id = %message_id, "subscriber disconnected, turn cancelled");
            }
            Err(err) => {
                warn!(state = %TurnState::Failed, assistant_message_id = %message_id, error = %err, "turn failed");
                if tx.send(TurnEvent::Error(err.to_string())).await.is_err() {
                    debug!("subscriber left before the error frame");
                }
            }
        }
    }

    /// Run the generation rounds. Returns `Ok(Some(context_tokens))` on
    /// completion, `Ok(None)` if the subscriber went away.
    async fn generate(
        &self,
        prepared: PreparedTurn,
        tx: &mut mpsc::Sender<TurnEvent>,
    ) -> Result<Option<usize>> {
        let max_steps = self.generation_config.max_tool_steps as usize;
        let mut messages = prepared.messages;
        let mut answer = String::new();
        let mut reasoning = String::new();
        let mut tool_parts: Vec<MessagePart> = Vec::new();
        let mut step = 0;

        loop {
            let round = with_turn_timeout(
                self.generation_config.timeout(),
                self.run_round(&messages, &mut answer, &mut reasoning, &mut tool_parts, tx),
            )
            .await?;

            let Some(calls) = round else {
                return Ok(None);
            };
            if calls.is_empty() {
                break;
            }
            if step >= max_steps {
                warn!(
                    max_steps,
                    "tool step limit reached, finalizing turn without further calls"
                );
                break;
            }
            step += 1;

            for (name, arguments) in calls {
                let output = match self.tools.run(&name, &arguments).await {
                    Ok(output) => output,
                    Err(err) => format!("The tool '{name}' failed: {err}"),
                };
                messages.push(ChatMessage::assistant(format!(
                    "[called tool {name} with {arguments}]"
                )));
                messages.push(ChatMessage::tool(output));
            }
        }

        let mut parts = Vec::new();
        if !reasoning.is_empty() {
            parts.push(MessagePart::Reasoning { text: reasoning });
        }
        parts.extend(tool_parts);
        parts.push(MessagePart::Text { text: answer });

        self.database
            .upsert_message(NewMessage {
                id: prepared.assistant_message_id,
                owner: prepared.owner,
                role: MessageRole::Assistant,
                parts,
                attachments: vec![],
            })
            .await?;

        Ok(Some(prepared.context_tokens))
    }

    /// One generation round. Relays events to the subscriber as they
    /// arrive and returns the tool calls the model requested, or `None` if
    /// the subscriber disconnected.
    async fn run_round(
        &self,
        messages: &[ChatMessage],
        answer: &mut String,
        reasoning: &mut String,
        tool_parts: &mut Vec<MessagePart>,
        tx: &mut mpsc::Sender<TurnEvent>,
    ) -> Result<Option<Vec<(String, serde_json::Value)>>> {
        let mut stream = self.generation.stream_chat(messages).await?;
        let mut calls = Vec::new();

        while let Some(event) = stream.next_event().await? {
            let relayed = match event {
                GenerationEvent::Delta(text) => {
                    answer.push_str(&text);
                    TurnEvent::Delta(text)
                }
                GenerationEvent::Reasoning(text) => {
                    reasoning.push_str(&text);
                    TurnEvent::Reasoning(text)
                }
                GenerationEvent::ToolCall { name, arguments } => {
                    tool_parts.push(MessagePart::ToolCall {
                        name: name.clone(),
                        arguments: arguments.clone(),
                    });
                    calls.push((name.clone(), arguments.clone()));
                    TurnEvent::ToolCall { name, arguments }
                }
                GenerationEvent::Done => break,
            };
            if tx.send(relayed).await.is_err() {
                return Ok(None);
            }
        }

        Ok(Some(calls))
    }
}

fn system_prompt(context: &AssembledContext) -> String {
    let mut prompt = String::from(
        "You are a study assistant for lecture recordings. Answer using the \
         lecture transcript context when it is relevant, and say so when the \
         transcripts do not cover the question.",
    );
    if !context.is_empty() {
        prompt.push_str("\n\n# Lecture transcripts\n\n");
        prompt.push_str(&context.text);
    }
    prompt
}

/// Flatten persisted history into prompt messages, keeping only the visible
/// text parts. Reasoning traces and tool records stay out of the prompt.
fn history_to_prompt(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter_map(|message| {
            let text: String = message
                .parts
                .iter()
                .filter_map(|part| match part {
                    MessagePart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            if text.is_empty() {
                return None;
            }
            Some(match message.role {
                MessageRole::User => ChatMessage::user(text),
                MessageRole::Assistant => ChatMessage::assistant(text),
                MessageRole::System => ChatMessage::system(text),
            })
        })
        .collect()
}
