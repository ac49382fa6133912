use anyhow::{Result, anyhow};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::image_source::InlineImage;
use crate::settings::QualityLevel;
use crate::translations::ResponseSchema;

mod gemini;
mod openai;

pub use gemini::Gemini;
pub use openai::OpenAI;

pub(crate) const TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAI,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAI => "openai",
        }
    }

    pub fn default_model(&self, quality: QualityLevel) -> &'static str {
        match (self, quality) {
            (ProviderKind::Gemini, QualityLevel::Fast) => "gemini-2.5-flash-lite",
            (ProviderKind::Gemini, QualityLevel::Balanced) => "gemini-2.5-flash",
            (ProviderKind::Gemini, QualityLevel::High) => "gemini-2.5-pro",
            (ProviderKind::OpenAI, QualityLevel::Fast) => "gpt-4o-mini",
            (ProviderKind::OpenAI, QualityLevel::Balanced) => "gpt-4.1-mini",
            (ProviderKind::OpenAI, QualityLevel::High) => "gpt-4.1",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSelection {
    pub provider: ProviderKind,
    pub requested_model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Raw model output; the caller is responsible for parsing `text`.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone, Copy)]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Image(InlineImage),
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user_image(image: InlineImage) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Image(image)],
        }
    }
}

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send>>;

pub trait Provider: Clone + Send + Sync + 'static {
    fn append_system_input(self, input: String) -> Self;
    fn append_user_input(self, input: String) -> Self;
    fn append_user_image(self, image: InlineImage) -> Self;
    fn with_response_schema(self, schema: ResponseSchema) -> Self;
    fn generate(self) -> ProviderFuture;
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    Gemini(Gemini),
    OpenAI(OpenAI),
}

impl Provider for ProviderImpl {
    fn append_system_input(self, input: String) -> Self {
        match self {
            ProviderImpl::Gemini(provider) => {
                ProviderImpl::Gemini(provider.append_system_input(input))
            }
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_system_input(input))
            }
        }
    }

    fn append_user_input(self, input: String) -> Self {
        match self {
            ProviderImpl::Gemini(provider) => {
                ProviderImpl::Gemini(provider.append_user_input(input))
            }
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_user_input(input))
            }
        }
    }

    fn append_user_image(self, image: InlineImage) -> Self {
        match self {
            ProviderImpl::Gemini(provider) => {
                ProviderImpl::Gemini(provider.append_user_image(image))
            }
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_user_image(image))
            }
        }
    }

    fn with_response_schema(self, schema: ResponseSchema) -> Self {
        match self {
            ProviderImpl::Gemini(provider) => {
                ProviderImpl::Gemini(provider.with_response_schema(schema))
            }
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.with_response_schema(schema))
            }
        }
    }

    fn generate(self) -> ProviderFuture {
        match self {
            ProviderImpl::Gemini(provider) => provider.generate(),
            ProviderImpl::OpenAI(provider) => provider.generate(),
        }
    }
}

pub fn build_provider(provider: ProviderKind, key: String, model: String) -> ProviderImpl {
    match provider {
        ProviderKind::Gemini => ProviderImpl::Gemini(Gemini::new(key).with_model(model)),
        ProviderKind::OpenAI => ProviderImpl::OpenAI(OpenAI::new(key).with_model(model)),
    }
}

pub fn resolve_provider_selection(
    model_arg: Option<&str>,
    override_key: Option<&str>,
) -> Result<ProviderSelection> {
    match model_arg {
        Some(model) => parse_model_arg(model),
        None => default_provider_selection(override_key),
    }
}

pub fn resolve_key(provider: ProviderKind, override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key {
        return Ok(key.to_string());
    }

    match provider {
        ProviderKind::Gemini => get_env("GEMINI_API_KEY").or_else(|| get_env("GOOGLE_API_KEY")),
        ProviderKind::OpenAI => get_env("OPENAI_API_KEY"),
    }
    .ok_or_else(|| anyhow!("API key not found for provider {}", provider.as_str()))
}

pub fn resolve_model(selection: &ProviderSelection, quality: QualityLevel) -> String {
    selection
        .requested_model
        .clone()
        .unwrap_or_else(|| selection.provider.default_model(quality).to_string())
}

fn default_provider_selection(override_key: Option<&str>) -> Result<ProviderSelection> {
    if get_env("GEMINI_API_KEY").is_some() || get_env("GOOGLE_API_KEY").is_some() {
        return Ok(ProviderSelection {
            provider: ProviderKind::Gemini,
            requested_model: None,
        });
    }

    if get_env("OPENAI_API_KEY").is_some() {
        return Ok(ProviderSelection {
            provider: ProviderKind::OpenAI,
            requested_model: None,
        });
    }

    if override_key.is_some() {
        return Ok(ProviderSelection {
            provider: ProviderKind::Gemini,
            requested_model: None,
        });
    }

    Err(anyhow!(
        "no API keys found (checked GEMINI_API_KEY/GOOGLE_API_KEY, OPENAI_API_KEY)"
    ))
}

fn parse_model_arg(model_arg: &str) -> Result<ProviderSelection> {
    let raw = model_arg.trim();
    if raw.is_empty() {
        return Err(anyhow!("model argument is empty"));
    }

    if let Some(provider) = provider_from_name(&raw.to_lowercase()) {
        return Ok(ProviderSelection {
            provider,
            requested_model: None,
        });
    }

    if let Some((provider_part, model_part)) = raw.split_once(':') {
        if let Some(provider) = provider_from_name(&provider_part.trim().to_lowercase()) {
            let model = model_part.trim();
            return Ok(ProviderSelection {
                provider,
                requested_model: (!model.is_empty()).then(|| model.to_string()),
            });
        }
    }

    let lower = raw.to_lowercase();
    if lower.starts_with("gemini") {
        return Ok(ProviderSelection {
            provider: ProviderKind::Gemini,
            requested_model: Some(raw.to_string()),
        });
    }
    if lower.starts_with("gpt-") || lower.starts_with("o4") {
        return Ok(ProviderSelection {
            provider: ProviderKind::OpenAI,
            requested_model: Some(raw.to_string()),
        });
    }

    Err(anyhow!(
        "unable to infer provider from model '{}'. Use provider:model (gemini:, openai:)",
        raw
    ))
}

fn provider_from_name(name: &str) -> Option<ProviderKind> {
    match name {
        "gemini" | "google" => Some(ProviderKind::Gemini),
        "openai" => Some(ProviderKind::OpenAI),
        _ => None,
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub(crate) fn format_error_parts(
    message: Option<String>,
    kind: Option<String>,
    code: Option<String>,
) -> String {
    let parts = [
        message,
        kind.map(|value| format!("type: {}", value)),
        code.map(|value| format!("code: {}", value)),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.trim().is_empty() && !part.ends_with(": "))
    .collect::<Vec<_>>();
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(" | ")
    }
}
