use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use super::{
    AssistantClient, AssistantError, ChatReply, ChatRequest, SummarizeRequest, SummaryReply,
    TranslateRequest, Translation,
};

/// Client for HTTPS callable functions: `POST {base}/{name}` with
/// `{"data": ...}`, answered by `{"result": ...}` or `{"error": {...}}`.
#[derive(Clone)]
pub struct CallableAssistant {
    base_url: String,
    http_client: reqwest::Client,
}

impl CallableAssistant {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    async fn call<Req, Res>(&self, name: &str, request: &Req) -> Result<Res, AssistantError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, name);
        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "data": request }))
            .send()
            .await
            .map_err(|e| AssistantError::Network(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::InvalidResponse(e.to_string()))?;

        if !status.is_success() && body.get("error").is_none() {
            return Err(AssistantError::Provider(format!("{name} failed with {status}")));
        }
        parse_callable_body(body)
    }
}

pub(crate) fn parse_callable_body<Res: DeserializeOwned>(mut body: Value) -> Result<Res, AssistantError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let status = error
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("INTERNAL");
        return Err(match status {
            "UNAVAILABLE" | "DEADLINE_EXCEEDED" => AssistantError::Network(message.to_string()),
            "UNAUTHENTICATED" => AssistantError::NotReady,
            _ => AssistantError::Provider(message.to_string()),
        });
    }

    let result = body
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| AssistantError::InvalidResponse("missing result".into()))?;
    serde_json::from_value(result).map_err(|e| AssistantError::InvalidResponse(e.to_string()))
}

impl AssistantClient for CallableAssistant {
    async fn translate(&self, request: TranslateRequest) -> Result<Translation, AssistantError> {
        self.call("translateWord", &request).await
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, AssistantError> {
        self.call("askGemini", &request).await
    }

    async fn summarize(&self, request: SummarizeRequest) -> Result<SummaryReply, AssistantError> {
        self.call("summarizeVideo", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_payload_is_decoded() {
        let translation: Translation = parse_callable_body(json!({
            "result": {"translatedText": "hello", "detectedSourceLanguage": "fr"}
        }))
        .unwrap();
        assert_eq!(translation.translated_text, "hello");
        assert_eq!(translation.detected_source_language, "fr");
    }

    #[test]
    fn error_payload_maps_to_typed_error() {
        let err = parse_callable_body::<Translation>(json!({
            "error": {"status": "INTERNAL", "message": "Translation failed: boom"}
        }))
        .unwrap_err();
        assert_eq!(err, AssistantError::Provider("Translation failed: boom".into()));

        let err = parse_callable_body::<Translation>(json!({
            "error": {"status": "UNAVAILABLE", "message": "down"}
        }))
        .unwrap_err();
        assert!(matches!(err, AssistantError::Network(_)));
    }

    #[test]
    fn malformed_result_is_invalid_response() {
        let err = parse_callable_body::<ChatReply>(json!({"result": {"text": 1}})).unwrap_err();
        assert!(matches!(err, AssistantError::InvalidResponse(_)));
        let err = parse_callable_body::<ChatReply>(json!({})).unwrap_err();
        assert!(matches!(err, AssistantError::InvalidResponse(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = CallableAssistant::new("http://localhost:5001/demo/europe-west1/");
        assert_eq!(client.base_url, "http://localhost:5001/demo/europe-west1");
    }
}
