use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tera::{Context as TeraContext, Tera};

pub mod parse;

pub use parse::{parse_regions, strip_code_fences, ParseError};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.tera");

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub target_lang: String,
    pub source_lang: String,
}

impl ScanOptions {
    pub fn new(target_lang: impl Into<String>, source_lang: impl Into<String>) -> Self {
        Self {
            target_lang: target_lang.into(),
            source_lang: source_lang.into(),
        }
    }

    fn is_auto_source(&self) -> bool {
        let source = self.source_lang.trim();
        source.is_empty() || source.eq_ignore_ascii_case("auto")
    }
}

/// Structured-output contract sent to the provider, as a JSON schema.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

pub const SCHEMA_NAME: &str = "page_translation";

pub fn response_schema() -> ResponseSchema {
    let bubble = json!({
        "type": "object",
        "properties": {
            "box_2d": {
                "type": "array",
                "items": {"type": "number"},
                "minItems": 4,
                "maxItems": 4
            },
            "translated_text": {"type": "string"},
            "original_text": {"type": "string"},
            "type": {"type": "string", "enum": ["speech", "thought", "narrative"]},
            "confidence": {"type": "number"}
        },
        "required": ["box_2d", "translated_text"]
    });
    ResponseSchema {
        name: SCHEMA_NAME.to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "bubbles": {"type": "array", "items": bubble}
            },
            "required": ["bubbles"]
        }),
    }
}

pub fn render_system_prompt(options: &ScanOptions) -> Result<String> {
    let target = options.target_lang.trim();
    if target.is_empty() {
        return Err(anyhow!("target language is empty"));
    }
    let source_hint = if options.is_auto_source() {
        "Detect the source language automatically.".to_string()
    } else {
        format!("The source text is written in {}.", options.source_lang.trim())
    };
    let mut context = TeraContext::new();
    context.insert("target_lang", target);
    context.insert("source_hint", &source_hint);

    let rendered = Tera::one_off(SYSTEM_PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render system prompt")?;
    Ok(rendered.trim().to_string())
}

pub fn user_instruction(options: &ScanOptions) -> String {
    format!(
        "Scan the attached page and translate every text element into {}.",
        options.target_lang.trim()
    )
}
