use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use url::Url;

pub const PNG_MIME: &str = "image/png";

/// Where the current page comes from. Only inline images can be scanned.
#[derive(Debug, Clone, Default)]
pub enum ImageSource {
    Inline(InlineImage),
    RemoteFrame(Url),
    #[default]
    None,
}

impl ImageSource {
    /// Parses a front-end supplied reference once, at the boundary.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Ok(ImageSource::None);
        }
        if raw
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
        {
            return InlineImage::from_data_url(raw).map(ImageSource::Inline);
        }
        let url = Url::parse(raw).with_context(|| format!("invalid image source: {}", raw))?;
        match url.scheme() {
            "http" | "https" => Ok(ImageSource::RemoteFrame(url)),
            other => Err(anyhow!("unsupported image source scheme '{}'", other)),
        }
    }

    pub fn inline(&self) -> Option<&InlineImage> {
        match self {
            ImageSource::Inline(image) => Some(image),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::Inline(_) => "inline",
            ImageSource::RemoteFrame(_) => "remote_frame",
            ImageSource::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InlineImage {
    bytes: Arc<[u8]>,
    mime: String,
    width: u32,
    height: u32,
}

impl InlineImage {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(anyhow!("image data is empty"));
        }
        let mime = sniff_image_mime(&bytes)
            .ok_or_else(|| anyhow!("data is not a recognised image format"))?;
        let (width, height) = image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .with_context(|| "failed to read image header")?
            .into_dimensions()
            .with_context(|| "failed to decode image dimensions")?;
        if width == 0 || height == 0 {
            return Err(anyhow!("image has zero dimensions"));
        }
        Ok(Self {
            bytes: Arc::from(bytes),
            mime: mime.to_string(),
            width,
            height,
        })
    }

    pub fn from_data_url(input: &str) -> Result<Self> {
        let rest = input
            .trim()
            .get(5..)
            .ok_or_else(|| anyhow!("data URL is truncated"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| anyhow!("data URL has no payload"))?;
        let mut params = header.split(';');
        let declared = params.next().unwrap_or_default().trim().to_lowercase();
        if !declared.starts_with("image/") {
            return Err(anyhow!(
                "data URL does not carry an image (declared '{}')",
                declared
            ));
        }
        if !params.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
            return Err(anyhow!("data URL must be base64 encoded"));
        }
        let bytes = BASE64
            .decode(payload.trim())
            .with_context(|| "failed to decode base64 image data")?;
        Self::from_bytes(bytes)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image file: {}", path.display()))?;
        Self::from_bytes(bytes)
            .with_context(|| format!("failed to load image: {}", path.display()))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    let detected = kind.mime_type();
    if detected.starts_with("image/") {
        Some(detected)
    } else {
        None
    }
}
