use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::path::Path;
use tracing::info;

pub mod engine;
pub mod image_source;
pub mod logging;
mod providers;
pub mod reconcile;
pub mod regions;
pub mod server;
pub mod settings;
mod test_util;
pub mod translations;
mod translator;
pub mod viewport;

pub use engine::{Dispatch, Engine, EngineSnapshot};
pub use image_source::{ImageSource, InlineImage};
pub use providers::{Gemini, OpenAI, Provider, ProviderImpl, ProviderKind, ProviderUsage};
pub use regions::{Capture, TextRegion};
pub use translator::{ScanError, ScanOutput, Translator};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub image: Option<String>,
    pub lang: Option<String>,
    pub source_lang: Option<String>,
    pub model: Option<String>,
    pub key: Option<String>,
    pub scroll_offset: f64,
    pub viewport_height: Option<f64>,
    pub settings_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct ScanReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<ProviderUsage>,
    regions: Vec<TextRegion>,
}

/// Scans one page at the given capture and prints the placed regions.
pub async fn run(config: Config) -> Result<String> {
    let raw_image = config
        .image
        .as_deref()
        .ok_or_else(|| anyhow!("--image is required unless --serve is used"))?;
    let source = load_image_arg(raw_image)?;
    let settings = load_config_settings(&config)?;
    let height = config
        .viewport_height
        .unwrap_or(settings.scan.initial_viewport_height);
    let capture = Capture::new(config.scroll_offset, height);
    let window = reconcile::EvictionWindow::from(&settings.scan);
    let options = translations::ScanOptions::new(
        settings.engine.target_language.clone(),
        settings.engine.source_language.clone(),
    );

    let translator = build_translator(&config, &settings)?;
    let output = translator.translate(&source, &options).await?;
    let regions = reconcile::reconcile(&[], output.regions, &capture, &window);

    let report = ScanReport {
        model: output.model,
        usage: output.usage,
        regions,
    };
    serde_json::to_string_pretty(&report).with_context(|| "failed to serialize regions")
}

/// Runs the overlay engine behind the local HTTP API.
pub async fn serve(config: Config, addr: String) -> Result<()> {
    let settings = load_config_settings(&config)?;
    let translator = build_translator(&config, &settings)?;
    let engine = Engine::new(translator, settings);
    if let Some(raw_image) = config.image.as_deref() {
        let source = load_image_arg(raw_image)?;
        engine.load_source(source, config.viewport_height);
    }
    server::run_server(engine, addr).await
}

fn load_config_settings(config: &Config) -> Result<settings::Settings> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    if let Some(lang) = config.lang.as_deref().map(str::trim).filter(|lang| !lang.is_empty()) {
        settings.engine.target_language = lang.to_string();
    }
    if let Some(lang) = config
        .source_lang
        .as_deref()
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
    {
        settings.engine.source_language = lang.to_string();
    }
    settings.engine.validate()?;
    Ok(settings)
}

fn build_translator(
    config: &Config,
    settings: &settings::Settings,
) -> Result<Translator<ProviderImpl>> {
    let selection =
        providers::resolve_provider_selection(config.model.as_deref(), config.key.as_deref())?;
    let key = providers::resolve_key(selection.provider, config.key.as_deref())
        .with_context(|| "no API key found for selected provider")?;
    let model = providers::resolve_model(&selection, settings.engine.quality);
    info!("using {}:{}", selection.provider.as_str(), model);
    let provider = providers::build_provider(selection.provider, key, model);
    Ok(Translator::new(provider, settings.scan.timeout))
}

/// Accepts a file path, a `data:` URL, or an http(s) frame URL.
fn load_image_arg(raw: &str) -> Result<ImageSource> {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    if lower.starts_with("data:") || lower.starts_with("http://") || lower.starts_with("https://") {
        return ImageSource::parse(trimmed);
    }
    let image = InlineImage::load(Path::new(trimmed))?;
    Ok(ImageSource::Inline(image))
}
