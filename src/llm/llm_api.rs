use super::{InferenceParam, LLMBase, Message, ReplyStream, role_to_str, str_to_role};
use super::function_tools::{ToolCalls, ToolCallsFuncSpec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use log::{error, debug, warn};

/// Client for an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone)]
pub struct LLMAPI {
    model_name: String,
    api_endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl LLMAPI {
    /// Create a new LLMAPI instance
    pub fn new(
        model_name: String,
        api_endpoint: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            model_name,
            api_endpoint,
            api_key,
            client,
        })
    }

    /// Parse tool calls from JSON array
    fn parse_tool_calls(tool_calls_value: &Value) -> Vec<ToolCalls> {
        tool_calls_value
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let type_name = tc.get("type")?.as_str()?.to_string();
                        let func = tc.get("function")?;
                        let name = func.get("name")?.as_str()?.to_string();

                        let arguments = func
                            .get("arguments")
                            .and_then(|args| {
                                if args.is_string() {
                                    args.as_str()
                                        .and_then(|s| serde_json::from_str::<Value>(s).ok())
                                } else {
                                    Some(args.clone())
                                }
                            })
                            .unwrap_or(Value::Null);

                        Some(ToolCalls {
                            id,
                            type_name,
                            function: ToolCallsFuncSpec { name, arguments },
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse_api_message(api_resp: &Value) -> Option<Message> {
        let choices = api_resp.get("choices")?.as_array()?;
        let choice = choices.first()?;
        let msg = choice.get("message")?;

        let role_str = msg.get("role").and_then(|r| r.as_str()).unwrap_or("assistant");
        let role = str_to_role(role_str);

        let content = msg.get("content").and_then(|c| c.as_str()).map(|s| s.to_string());
        let tool_calls = msg
            .get("tool_calls")
            .map(Self::parse_tool_calls)
            .unwrap_or_default();

        Some(Message {
            role,
            content,
            tool_calls,
        })
    }

    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let mut msg_obj = json!({
                    "role": role_to_str(&msg.role),
                    "content": msg.content,
                });

                if !msg.tool_calls.is_empty() {
                    let tool_calls: Vec<_> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": tc.type_name,
                                "function": {
                                    "name": tc.function.name,
                                    "arguments": tc.function.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    msg_obj["tool_calls"] = json!(tool_calls);
                }

                msg_obj
            })
            .collect()
    }

    fn build_request(&self, request_body: &Value) -> reqwest::RequestBuilder {
        let mut request = self.client.post(&self.api_endpoint).json(request_body);

        if let Some(ref api_key) = self.api_key {
            // Check if api_key already contains "Bearer " prefix
            let auth_header = if api_key.starts_with("Bearer ") {
                api_key.to_string()
            } else {
                format!("Bearer {}", api_key)
            };
            request = request.header("Authorization", auth_header);
        }
        request
    }

    /// Extract the text delta of one server-sent-event line.
    ///
    /// Returns `Err(())` when the line marks the end of the stream.
    fn parse_sse_line(line: &str) -> std::result::Result<Option<String>, ()> {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Err(());
        }
        match serde_json::from_str::<Value>(data) {
            Ok(chunk) => Ok(chunk["choices"][0]["delta"]["content"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())),
            Err(e) => {
                warn!("Skipping malformed stream chunk ({}): {}", e, data);
                Ok(None)
            }
        }
    }
}

/// Raw response bytes waiting for a line break.
/// Lines are decoded only once complete, so a character split across chunks survives.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            match String::from_utf8(line) {
                Ok(line) => lines.push(line),
                Err(e) => warn!("Skipping stream line that is not valid UTF-8: {}", e),
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        String::from_utf8(std::mem::take(&mut self.pending)).ok()
    }
}

#[async_trait]
impl LLMBase for LLMAPI {
    fn get_model_name(&self) -> &str {
        &self.model_name
    }

    async fn inference(&self, param: &InferenceParam<'_>) -> Result<Message> {
        let mut request_body = json!({
            "model": self.model_name,
            "messages": Self::messages_to_json(param.messages),
        });

        if let Some(tool_list) = param.tools {
            let tools: Vec<Value> = tool_list.iter().map(|tool| tool.get_json()).collect();
            request_body["tools"] = json!(tools);
            request_body["tool_choice"] = match param.tool_choice {
                Some(name) => json!({ "type": "function", "function": { "name": name } }),
                None => json!("auto"),
            };
        }

        let response = self.build_request(&request_body).send().await?;
        let status = response.status();
        let response_text = response.text().await?;
        if !status.is_success() {
            error!("API request failed with status {}: {}", status, response_text);
            return Err(Error::Upstream(format!("LLM API request failed with status {}", status)));
        }

        let api_resp: Value = serde_json::from_str(&response_text).map_err(|e| {
            error!("Failed to parse API response: {}, original response: {:?}", e, &response_text);
            e
        })?;
        let msg = Self::parse_api_message(&api_resp).ok_or_else(|| {
            error!("Invalid API response structure: missing required fields");
            Error::Upstream("Invalid response structure from LLM API".to_string())
        })?;
        debug!("Successfully parsed API response");
        Ok(msg)
    }

    async fn inference_stream(&self, messages: &[Message]) -> Result<ReplyStream> {
        let request_body = json!({
            "model": self.model_name,
            "messages": Self::messages_to_json(messages),
            "stream": true,
        });

        let mut response = self.build_request(&request_body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Streaming API request failed with status {}: {}", status, error_text);
            return Err(Error::Upstream(format!("LLM API request failed with status {}", status)));
        }

        let (tx, stream) = ReplyStream::pair();
        tokio::spawn(async move {
            let mut buffer = SseLineBuffer::default();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        for line in buffer.push(&bytes) {
                            match LLMAPI::parse_sse_line(&line) {
                                Ok(Some(delta)) => {
                                    if tx.send(Ok(delta)).is_err() {
                                        debug!("Reply stream receiver dropped, stopping");
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(()) => return,
                            }
                        }
                    }
                    Ok(None) => {
                        // Final event without a trailing line break
                        if let Some(line) = buffer.finish() {
                            if let Ok(Some(delta)) = LLMAPI::parse_sse_line(&line) {
                                let _ = tx.send(Ok(delta));
                            }
                        }
                        return;
                    }
                    Err(e) => {
                        error!("Streaming response failed: {}", e);
                        let _ = tx.send(Err(Error::Http(e)));
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }
}
