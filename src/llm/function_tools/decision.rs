use super::FunctionTool;
use crate::error::{Error, Result};
use crate::llm::{InferenceParam, LLMBase, Message, UserMessage};
use log::{debug, warn};
use serde_json::{json, Value};
use std::sync::Arc;

/// Forced-choice decision: the model must call this tool with exactly one of `choices`.
///
/// Parameters:
/// - decision (string, required, enum): the chosen label
#[derive(Debug, Clone)]
pub struct DecisionTool {
    description: String,
    choices: Vec<String>,
}

impl DecisionTool {
    pub fn new(description: impl Into<String>, choices: Vec<String>) -> Self {
        Self { description: description.into(), choices }
    }

    fn match_choice(&self, raw: &str) -> Option<String> {
        let raw = raw.trim().trim_matches('"');
        self.choices.iter().find(|c| c.as_str() == raw).cloned()
    }

    /// Ask the model to pick one label given `memories` as context.
    ///
    /// Returns `Ok(None)` when the model answered outside the enumeration.
    pub async fn decide(&self, llm: &dyn LLMBase, memories: &[Message]) -> Result<Option<String>> {
        let mut messages = memories.to_vec();
        messages.push(UserMessage(format!(
            "{}\n\nChoose exactly one of: {}",
            self.description,
            self.choices
                .iter()
                .map(|c| format!("\"{}\"", c))
                .collect::<Vec<_>>()
                .join(", ")
        )));

        let tools: Vec<Arc<dyn FunctionTool>> = vec![Arc::new(self.clone())];
        let response = llm
            .inference(&InferenceParam {
                messages: &messages,
                tools: Some(&tools),
                tool_choice: Some(self.name()),
            })
            .await?;

        if let Some(tool_call) = response.tool_calls.iter().find(|tc| tc.function.name == self.name()) {
            return match self.call(tool_call.function.arguments.clone()) {
                Ok(value) => Ok(value["decision"].as_str().map(|s| s.to_string())),
                Err(e) => {
                    warn!("[DecisionTool] model returned an invalid decision: {}", e);
                    Ok(None)
                }
            };
        }

        // Some endpoints ignore tool_choice and answer in plain text
        debug!("[DecisionTool] no tool call in response, matching plain content");
        Ok(response.content.as_deref().and_then(|c| self.match_choice(c)))
    }
}

impl FunctionTool for DecisionTool {
    fn name(&self) -> &str { "decision" }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "decision": {
                    "type": "string",
                    "enum": self.choices,
                    "description": "The single option that best answers the question"
                }
            },
            "required": ["decision"],
            "additionalProperties": false
        })
    }

    fn call(&self, arguments: Value) -> Result<Value> {
        let raw = arguments
            .get("decision")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ValidationError("missing required parameter: decision".to_string()))?;
        let choice = self
            .match_choice(raw)
            .ok_or_else(|| Error::ValidationError(format!("'{}' is not one of the allowed choices", raw)))?;
        Ok(json!({ "decision": choice }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::function_tools::{ToolCalls, ToolCallsFuncSpec};
    use crate::llm::{MessageRole, ReplyStream};
    use async_trait::async_trait;

    fn tool() -> DecisionTool {
        DecisionTool::new(
            "Who is the speaker talking to?",
            vec!["Glandon, for sure".into(), "someone else".into()],
        )
    }

    struct FixedLLM {
        response: Message,
    }

    #[async_trait]
    impl LLMBase for FixedLLM {
        fn get_model_name(&self) -> &str { "fixed" }

        async fn inference(&self, param: &InferenceParam<'_>) -> Result<Message> {
            assert_eq!(param.tool_choice, Some("decision"));
            Ok(self.response.clone())
        }

        async fn inference_stream(&self, _messages: &[Message]) -> Result<ReplyStream> {
            Ok(ReplyStream::from_text(""))
        }
    }

    fn tool_call_response(decision: &str) -> Message {
        Message {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: vec![ToolCalls {
                id: "call_1".into(),
                type_name: "function".into(),
                function: ToolCallsFuncSpec {
                    name: "decision".into(),
                    arguments: json!({ "decision": decision }),
                },
            }],
        }
    }

    #[test]
    fn test_parameters_carry_enum() {
        let params = tool().parameters();
        assert_eq!(params["properties"]["decision"]["enum"], json!(["Glandon, for sure", "someone else"]));
        assert_eq!(tool().get_json()["function"]["name"], "decision");
    }

    #[test]
    fn test_call_rejects_unknown_choice() {
        assert!(tool().call(json!({ "decision": "Glandon" })).is_err());
        assert!(tool().call(json!({})).is_err());
        assert_eq!(tool().call(json!({ "decision": "someone else" })).unwrap()["decision"], "someone else");
    }

    #[tokio::test]
    async fn test_decide_from_tool_call() {
        let llm = FixedLLM { response: tool_call_response("Glandon, for sure") };
        let choice = tool().decide(&llm, &[]).await.unwrap();
        assert_eq!(choice.as_deref(), Some("Glandon, for sure"));
    }

    #[tokio::test]
    async fn test_decide_outside_enum_is_none() {
        let llm = FixedLLM { response: tool_call_response("Glandon, maybe") };
        assert_eq!(tool().decide(&llm, &[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decide_from_plain_content_requires_exact_label() {
        let exact = FixedLLM {
            response: Message { role: MessageRole::Assistant, content: Some("\"someone else\"".into()), tool_calls: Vec::new() },
        };
        assert_eq!(tool().decide(&exact, &[]).await.unwrap().as_deref(), Some("someone else"));

        let fuzzy = FixedLLM {
            response: Message { role: MessageRole::Assistant, content: Some("I think someone else".into()), tool_calls: Vec::new() },
        };
        assert_eq!(tool().decide(&fuzzy, &[]).await.unwrap(), None);
    }
}
