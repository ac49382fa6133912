use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::image_source::{ImageSource, InlineImage};
use crate::providers::{Provider, ProviderUsage};
use crate::regions::RawRegion;
use crate::translations::{
    self, ParseError, ScanOptions, parse_regions, render_system_prompt, user_instruction,
};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no inline image is available to scan")]
    MissingImage,
    #[error("translation request failed: {0:#}")]
    Provider(anyhow::Error),
    #[error("translation timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("malformed translation response: {0}")]
    Malformed(#[from] ParseError),
}

impl ScanError {
    /// Missing images are expected while nothing is loaded and stay silent.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, ScanError::MissingImage)
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub regions: Vec<RawRegion>,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

/// Performs exactly one bounded provider call per scan.
#[derive(Debug, Clone)]
pub struct Translator<P: Provider> {
    provider: P,
    timeout: Duration,
}

impl<P: Provider> Translator<P> {
    pub fn new(provider: P, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub async fn translate(
        &self,
        source: &ImageSource,
        options: &ScanOptions,
    ) -> Result<ScanOutput, ScanError> {
        let Some(image) = source.inline() else {
            return Err(ScanError::MissingImage);
        };
        self.translate_image(image.clone(), options).await
    }

    pub async fn translate_image(
        &self,
        image: InlineImage,
        options: &ScanOptions,
    ) -> Result<ScanOutput, ScanError> {
        let system_prompt = render_system_prompt(options).map_err(ScanError::Provider)?;
        let (width, height) = image.dimensions();
        debug!(
            "requesting translation into {} for {}x{} {}",
            options.target_lang,
            width,
            height,
            image.mime()
        );

        let call = self
            .provider
            .clone()
            .with_response_schema(translations::response_schema())
            .append_system_input(system_prompt)
            .append_user_image(image)
            .append_user_input(user_instruction(options))
            .generate();

        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(ScanError::Provider(err)),
            Err(_) => return Err(ScanError::Timeout(self.timeout)),
        };

        let regions = parse_regions(&response.text)?;
        debug!(
            "provider {} returned {} region(s)",
            response.model.as_deref().unwrap_or("unknown"),
            regions.len()
        );
        Ok(ScanOutput {
            regions,
            model: response.model,
            usage: response.usage,
        })
    }
}
