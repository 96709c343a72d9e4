//! Request and response bodies shared by OpenAI-compatible chat endpoints.

use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

use crate::error::LLMError;
use crate::functions::{Tool, ToolChoice};
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse, TokenUsage};

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

impl<'a> From<&'a CompletionRequest> for ChatCompletionBody<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            tool_choice: request.tool_choice,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    choices: Vec<ReplyChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ReplyChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Posts `request` through an already-authenticated builder and returns the
/// first choice.
pub(crate) async fn send(
    builder: RequestBuilder,
    request: &CompletionRequest,
) -> Result<CompletionResponse, LLMError> {
    let response = builder.json(&ChatCompletionBody::from(request)).send().await?;
    let status = response.status();

    if !status.is_success() {
        let text = response.text().await?;
        return Err(LLMError::Provider(error_message(status, &text)));
    }

    first_choice(response.json().await?)
}

fn error_message(status: reqwest::StatusCode, text: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(text)
        .ok()
        .and_then(|envelope| envelope.error)
        .map(|detail| detail.message)
        .unwrap_or_else(|| format!("unexpected status {status}: {text}"))
}

fn first_choice(reply: ChatCompletionReply) -> Result<CompletionResponse, LLMError> {
    let choice = reply
        .choices
        .into_iter()
        .next()
        .ok_or(LLMError::InvalidResponse("response did not contain any choices"))?;

    Ok(CompletionResponse {
        message: choice.message,
        usage: reply.usage,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::functions::FunctionDefinition;

    #[test]
    fn body_omits_empty_tools() {
        let request = CompletionRequest::new("gpt-4", vec![ChatMessage::user("hello")])
            .with_temperature(0.0);
        let body = serde_json::to_value(ChatCompletionBody::from(&request)).expect("body");

        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["messages"][0], json!({"role": "user", "content": "hello"}));
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn body_carries_tool_declarations() {
        let request = CompletionRequest::new("gpt-4", vec![ChatMessage::user("hotels?")])
            .with_tools([FunctionDefinition::new("FindHotels").to_tool()])
            .with_tool_choice(ToolChoice::auto());
        let body = serde_json::to_value(ChatCompletionBody::from(&request)).expect("body");

        assert_eq!(body["tools"][0]["function"]["name"], "FindHotels");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn reply_tool_call_is_decoded() {
        let raw = json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "FindHotels", "arguments": "{\"location\":\"Paris\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let reply: ChatCompletionReply = serde_json::from_value(raw).expect("reply");
        let response = first_choice(reply).expect("choice");

        let call = response.message.tool_call().expect("tool call");
        assert_eq!(call.id(), Some("call_9"));
        assert_eq!(call.function.arguments, json!({"location": "Paris"}));
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(15));
    }

    #[test]
    fn empty_choices_is_invalid() {
        let reply: ChatCompletionReply =
            serde_json::from_value(json!({"choices": []})).expect("reply");
        assert!(matches!(first_choice(reply), Err(LLMError::InvalidResponse(_))));
    }

    #[test]
    fn error_envelope_message_is_preferred() {
        let status = reqwest::StatusCode::UNAUTHORIZED;
        assert_eq!(
            error_message(status, r#"{"error": {"message": "Incorrect API key"}}"#),
            "Incorrect API key"
        );
        assert_eq!(
            error_message(status, "gateway down"),
            "unexpected status 401 Unauthorized: gateway down"
        );
    }
}
