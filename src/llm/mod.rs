pub mod function_tools;
pub mod llm_api;
pub mod stream;

use std::sync::Arc;
use async_trait::async_trait;

use crate::error::Result;
use function_tools::{FunctionTool, ToolCalls};

pub use llm_api::LLMAPI;
pub use stream::ReplyStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

pub fn role_to_str(role: &MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

pub fn str_to_role(role: &str) -> MessageRole {
    match role {
        "system" => MessageRole::System,
        "user" => MessageRole::User,
        "tool" => MessageRole::Tool,
        _ => MessageRole::Assistant,
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCalls>,
}

#[allow(non_snake_case)]
pub fn UserMessage(content: String) -> Message {
    Message { role: MessageRole::User, content: Some(content), tool_calls: Vec::new() }
}

#[allow(non_snake_case)]
pub fn AssistantMessage(content: String) -> Message {
    Message { role: MessageRole::Assistant, content: Some(content), tool_calls: Vec::new() }
}

pub struct InferenceParam<'a> {
    pub messages: &'a [Message],
    pub tools: Option<&'a [Arc<dyn FunctionTool>]>,
    /// Force the model to call the named tool instead of answering freely
    pub tool_choice: Option<&'a str>,
}

#[async_trait]
pub trait LLMBase: Send + Sync {
    fn get_model_name(&self) -> &str;

    async fn inference(&self, param: &InferenceParam<'_>) -> Result<Message>;

    /// Start a streamed completion. Returns as soon as the upstream accepted the request;
    /// text deltas arrive on the returned stream.
    async fn inference_stream(&self, messages: &[Message]) -> Result<ReplyStream>;
}
