use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{Error, Result};

/// A paint request extracted from soul event metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PaintRequest {
    pub prompt: String,
    pub channel_id: String,
    pub message_id: String,
}

impl PaintRequest {
    /// Requires `discordMessage` (with `channelId` / `messageId`) and a non-empty `prompt`
    pub fn from_metadata(metadata: &Value) -> Result<Self> {
        let discord_message = metadata
            .get("discordMessage")
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::ValidationError("Discord message metadata is missing".to_string()))?;

        let prompt = metadata
            .get("prompt")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ValidationError("Prompt is missing".to_string()))?;

        let field = |name: &str| {
            discord_message
                .get(name)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| Error::ValidationError(format!("discordMessage.{} is missing", name)))
        };

        Ok(Self {
            prompt: prompt.to_string(),
            channel_id: field("channelId")?,
            message_id: field("messageId")?,
        })
    }
}

/// Turn the paint endpoint's response body into the text posted to the channel
pub fn decode_paint_response(content_type: Option<&str>, body: &str) -> Result<String> {
    let content_type = content_type.unwrap_or_default();
    if content_type.contains("application/json") {
        let data: Value = serde_json::from_str(body)?;
        let text = match data.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => match &data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Some(other) => other.to_string(),
        };
        Ok(text)
    } else if content_type.contains("text/plain") {
        Ok(body.to_string())
    } else if content_type.contains("text/html") {
        warn!("[Paint] Received HTML response: {}", body);
        Ok(body.to_string())
    } else {
        Err(Error::Upstream(format!("Unsupported response type: {}", content_type)))
    }
}

/// Client for the image-generation endpoint
pub struct PaintClient {
    url: String,
    client: Client,
}

impl PaintClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    /// Ask for a painting of `prompt`; returns the image URL (or whatever text the endpoint answered)
    pub async fn paint(&self, prompt: &str) -> Result<String> {
        info!("[Paint] making request to {} to paint {}...", self.url, prompt);
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "data": prompt }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("HTTP error! status: {}", status.as_u16())));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.text().await?;
        decode_paint_response(content_type.as_deref(), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_metadata() {
        let req = PaintRequest::from_metadata(&json!({
            "prompt": "a lighthouse at dusk",
            "discordMessage": { "messageId": "m1", "channelId": "c1" }
        }))
        .unwrap();
        assert_eq!(
            req,
            PaintRequest { prompt: "a lighthouse at dusk".into(), channel_id: "c1".into(), message_id: "m1".into() }
        );
    }

    #[test]
    fn test_missing_discord_message_is_rejected() {
        let err = PaintRequest::from_metadata(&json!({ "prompt": "x" })).unwrap_err();
        assert!(err.to_string().contains("Discord message metadata is missing"));
    }

    #[test]
    fn test_missing_prompt_is_rejected() {
        let err = PaintRequest::from_metadata(&json!({
            "discordMessage": { "messageId": "m1", "channelId": "c1" }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Prompt is missing"));
    }

    #[test]
    fn test_decode_json_prefers_message_field() {
        let text = decode_paint_response(
            Some("application/json; charset=utf-8"),
            r#"{"message":"https://img.example/1.png"}"#,
        )
        .unwrap();
        assert_eq!(text, "https://img.example/1.png");

        let whole = decode_paint_response(Some("application/json"), r#"{"url":"u"}"#).unwrap();
        assert_eq!(whole, r#"{"url":"u"}"#);

        let bare = decode_paint_response(Some("application/json"), r#""https://img.example/2.png""#).unwrap();
        assert_eq!(bare, "https://img.example/2.png");
    }

    #[test]
    fn test_decode_text_and_html() {
        assert_eq!(decode_paint_response(Some("text/plain"), "https://x/y.png").unwrap(), "https://x/y.png");
        assert_eq!(decode_paint_response(Some("text/html"), "<p>hi</p>").unwrap(), "<p>hi</p>");
    }

    #[test]
    fn test_decode_unsupported_type() {
        assert!(decode_paint_response(Some("image/png"), "...").is_err());
        assert!(decode_paint_response(None, "...").is_err());
    }
}
