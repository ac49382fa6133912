use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    Message, MessagePart, MessageRole, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
    TEMPERATURE, format_error_parts,
};
use crate::image_source::InlineImage;
use crate::translations::ResponseSchema;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub(crate) const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct Gemini {
    key: String,
    model: String,
    messages: Vec<Message>,
    schema: Option<ResponseSchema>,
}

impl Gemini {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            messages: Vec::new(),
            schema: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    fn request_body(self) -> Value {
        let (system_inputs, user_inputs): (Vec<Message>, Vec<Message>) = self
            .messages
            .into_iter()
            .partition(|message| matches!(message.role, MessageRole::System));

        let system_instruction = system_inputs
            .into_iter()
            .flat_map(|message| message.parts)
            .filter_map(|part| match part {
                MessagePart::Text(text) => Some(text),
                MessagePart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let parts = user_inputs
            .into_iter()
            .flat_map(|message| message.parts)
            .map(|part| match part {
                MessagePart::Text(text) => json!({"text": text}),
                MessagePart::Image(image) => json!({
                    "inline_data": {
                        "mime_type": image.mime(),
                        "data": image.to_base64()
                    }
                }),
            })
            .collect::<Vec<_>>();

        let mut generation_config = json!({
            "responseMimeType": "application/json",
            "temperature": TEMPERATURE
        });
        if let Some(schema) = self.schema {
            generation_config["responseSchema"] = to_gemini_schema(&schema.schema);
        }

        json!({
            "contents": [{"role": "user", "parts": parts}],
            "systemInstruction": if system_instruction.trim().is_empty() {
                Value::Null
            } else {
                json!({"parts": [{"text": system_instruction}]})
            },
            "generationConfig": generation_config
        })
    }
}

impl Provider for Gemini {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn append_user_image(mut self, image: InlineImage) -> Self {
        self.messages.push(Message::user_image(image));
        self
    }

    fn with_response_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    fn generate(self) -> ProviderFuture {
        Box::pin(async move {
            let client = reqwest::Client::new();
            let url = format!("{}/{}:generateContent", base_url(), self.model);
            let key = self.key.clone();
            let model = self.model.clone();
            let body = self.request_body();

            let response = client
                .post(&url)
                .header("x-goog-api-key", key)
                .json(&body)
                .send()
                .await
                .with_context(|| "failed to reach Gemini")?;

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(anyhow!(
                    "Gemini API error ({}): {}",
                    status,
                    extract_gemini_error(&text).unwrap_or(text)
                ));
            }
            extract_text_response(&text, &model)
        })
    }
}

fn base_url() -> String {
    std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

/// Gemini expects OpenAPI-style upper-case type names and no array bounds.
fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                match (key.as_str(), value) {
                    ("type", Value::String(kind)) => {
                        out.insert(key.clone(), Value::String(kind.to_uppercase()));
                    }
                    ("minItems" | "maxItems", _) => {}
                    _ => {
                        out.insert(key.clone(), to_gemini_schema(value));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

fn extract_text_response(
    text: &str,
    fallback_model: &str,
) -> Result<ProviderResponse, anyhow::Error> {
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    let Some(candidate) = payload.candidates.first() else {
        let reason = payload
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(anyhow!("no candidate returned from Gemini ({})", reason));
    };

    let output = candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let model = payload
        .model_version
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage_metadata.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
    });
    Ok(ProviderResponse {
        text: output,
        model,
        usage,
    })
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(
        error.message,
        error.status,
        error.code.map(|value| value.to_string()),
    ))
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_source::test_images::tiny_png;
    use crate::translations::response_schema;
    use insta::assert_json_snapshot;

    #[test]
    fn gemini_extract_text_snapshot() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/gemini_response.json"
        ));
        let response = extract_text_response(payload, "gemini-2.5-flash").unwrap();
        assert_json_snapshot!(response, @r#"
        {
          "text": "{\"bubbles\": []}",
          "model": "gemini-2.5-flash",
          "usage": {
            "prompt_tokens": 1290,
            "completion_tokens": 8,
            "total_tokens": 1298
          }
        }
        "#);
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let payload = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let err = extract_text_response(payload, "gemini-2.5-flash").unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn request_body_carries_image_and_schema() {
        let body = Gemini::new("key")
            .with_response_schema(response_schema())
            .append_system_input("system".to_string())
            .append_user_image(tiny_png())
            .append_user_input("scan".to_string())
            .request_body();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "system");
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["text"], "scan");
        let schema = &body["generationConfig"]["responseSchema"];
        assert_eq!(schema["type"], "OBJECT");
        assert_eq!(schema["properties"]["bubbles"]["type"], "ARRAY");
        assert!(schema["properties"]["bubbles"]["items"]["properties"]["box_2d"]
            .get("minItems")
            .is_none());
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }
}
