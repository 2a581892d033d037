use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use async_trait::async_trait;
use serde_json::json;

use crate::bot_adapter::models::event_model::{ChatEvent, ChatEventType};
use crate::error::{Error, Result};
use crate::llm::function_tools::{ToolCalls, ToolCallsFuncSpec};
use crate::llm::{InferenceParam, LLMBase, Message, MessageRole, ReplyStream};

use super::pending::PendingPerceptions;
use super::perception::Perception;
use super::rag::{RetrievedDocument, Retriever};

pub const BOT_USER_ID: &str = "999";

/// A chatted perception from `user_name`, as the bridge would dispatch it
pub fn chatted(user_name: &str, content: &str) -> Perception {
    let event = ChatEvent {
        event_type: ChatEventType::MessageCreate,
        message_id: format!("msg-{}-{}", user_name, content.len()),
        channel_id: "general".into(),
        guild_id: Some("guild".into()),
        user_id: format!("id-{}", user_name),
        user_display_name: user_name.to_string(),
        at_mention_username: user_name.to_string(),
        replied_to_user_id: None,
        is_host: false,
    };
    Perception::chatted(event, content, Some(BOT_USER_ID.to_string()))
}

/// Scripted model: answers every decision with one label and streams fixed chunks
pub struct MockLLM {
    decision: String,
    reply_chunks: Vec<String>,
    fail_stream: bool,
    decision_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    last_stream_prompt: Mutex<Vec<Message>>,
    push_on_decision: Mutex<Option<(PendingPerceptions, Perception)>>,
}

impl MockLLM {
    pub fn deciding(label: &str) -> Self {
        Self {
            decision: label.to_string(),
            reply_chunks: vec!["Hello there".to_string()],
            fail_stream: false,
            decision_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            last_stream_prompt: Mutex::new(Vec::new()),
            push_on_decision: Mutex::new(None),
        }
    }

    pub fn replying(mut self, chunks: &[&str]) -> Self {
        self.reply_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn failing_stream(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    /// Queue `perception` into `pending` while the next decision is being made
    pub fn push_during_decision(&self, pending: PendingPerceptions, perception: Perception) {
        *self.push_on_decision.lock().unwrap() = Some((pending, perception));
    }

    pub fn decision_calls(&self) -> usize {
        self.decision_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn last_stream_prompt(&self) -> Vec<Message> {
        self.last_stream_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMBase for MockLLM {
    fn get_model_name(&self) -> &str {
        "mock"
    }

    async fn inference(&self, param: &InferenceParam<'_>) -> Result<Message> {
        self.decision_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.push_on_decision.lock().unwrap().take();
        if let Some((pending, perception)) = queued {
            pending.push(perception).await;
        }
        Ok(Message {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: vec![ToolCalls {
                id: "call_0".into(),
                type_name: "function".into(),
                function: ToolCallsFuncSpec {
                    name: param.tool_choice.unwrap_or("decision").to_string(),
                    arguments: json!({ "decision": self.decision }),
                },
            }],
        })
    }

    async fn inference_stream(&self, messages: &[Message]) -> Result<ReplyStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_stream_prompt.lock().unwrap() = messages.to_vec();
        if self.fail_stream {
            return Err(Error::Upstream("model unavailable".to_string()));
        }
        let (tx, stream) = ReplyStream::pair();
        for chunk in &self.reply_chunks {
            tx.send(Ok(chunk.clone())).unwrap();
        }
        Ok(stream)
    }
}

/// Retriever returning fixed documents and recording queries
pub struct MockRetriever {
    documents: Vec<RetrievedDocument>,
    calls: AtomicUsize,
    last_query: Mutex<Option<String>>,
}

impl MockRetriever {
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        Self {
            documents,
            calls: AtomicUsize::new(0),
            last_query: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<String> {
        self.last_query.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn search(&self, query: &str, _min_similarity: f64) -> Result<Vec<RetrievedDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.to_string());
        Ok(self.documents.clone())
    }
}
