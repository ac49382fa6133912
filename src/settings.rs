use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

pub const OPACITY_RANGE: (f32, f32) = (0.0, 1.0);
pub const FONT_SIZE_RANGE: (u32, u32) = (10, 20);
pub const UI_SCALE_RANGE: (f32, f32) = (0.7, 1.2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Fast,
    Balanced,
    #[default]
    High,
}

impl QualityLevel {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "fast" => Some(QualityLevel::Fast),
            "balanced" => Some(QualityLevel::Balanced),
            "high" => Some(QualityLevel::High),
            _ => None,
        }
    }
}

/// User-facing engine switches, read at the point of each scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub enabled: bool,
    pub auto_scan: bool,
    pub quality: QualityLevel,
    pub show_original: bool,
    pub opacity: f32,
    pub font_size: u32,
    pub source_language: String,
    pub target_language: String,
    pub ui_scale: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_scan: true,
            quality: QualityLevel::High,
            show_original: false,
            opacity: 0.95,
            font_size: 14,
            source_language: "auto".to_string(),
            target_language: "Turkish".to_string(),
            ui_scale: 1.0,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.target_language.trim().is_empty() {
            return Err(anyhow!("target_language is empty"));
        }
        if self.source_language.trim().is_empty() {
            return Err(anyhow!("source_language is empty (use \"auto\" to detect)"));
        }
        if !in_range(self.opacity, OPACITY_RANGE) {
            return Err(anyhow!(
                "opacity must be within {}..={} (got {})",
                OPACITY_RANGE.0,
                OPACITY_RANGE.1,
                self.opacity
            ));
        }
        if !(FONT_SIZE_RANGE.0..=FONT_SIZE_RANGE.1).contains(&self.font_size) {
            return Err(anyhow!(
                "font_size must be within {}..={} (got {})",
                FONT_SIZE_RANGE.0,
                FONT_SIZE_RANGE.1,
                self.font_size
            ));
        }
        if !in_range(self.ui_scale, UI_SCALE_RANGE) {
            return Err(anyhow!(
                "ui_scale must be within {}..={} (got {})",
                UI_SCALE_RANGE.0,
                UI_SCALE_RANGE.1,
                self.ui_scale
            ));
        }
        Ok(())
    }
}

/// Timing and geometry constants of the scan cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanTuning {
    pub quiet_period: Duration,
    pub distance_threshold: f64,
    pub evict_before: f64,
    pub evict_after: f64,
    pub timeout: Duration,
    pub notice_ttl: Duration,
    pub initial_viewport_height: f64,
}

impl Default for ScanTuning {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(700),
            distance_threshold: 450.0,
            evict_before: 2000.0,
            evict_after: 3000.0,
            timeout: Duration::from_secs(45),
            notice_ttl: Duration::from_secs(4),
            initial_viewport_height: 800.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub scan: ScanTuning,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    engine: Option<EngineSection>,
    overlay: Option<OverlaySection>,
    scan: Option<ScanSection>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSection {
    enabled: Option<bool>,
    auto_scan: Option<bool>,
    quality: Option<String>,
    source_language: Option<String>,
    target_language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySection {
    show_original: Option<bool>,
    opacity: Option<f32>,
    font_size: Option<u32>,
    ui_scale: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ScanSection {
    quiet_period_ms: Option<u64>,
    distance_threshold: Option<f64>,
    evict_before: Option<f64>,
    evict_after: Option<f64>,
    timeout_secs: Option<u64>,
    notice_secs: Option<u64>,
    initial_viewport_height: Option<f64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings
                .merge_toml(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(engine) = incoming.engine {
            let target = &mut self.engine;
            if let Some(enabled) = engine.enabled {
                target.enabled = enabled;
            }
            if let Some(auto_scan) = engine.auto_scan {
                target.auto_scan = auto_scan;
            }
            if let Some(quality) = engine.quality.as_deref().and_then(QualityLevel::from_label) {
                target.quality = quality;
            }
            if let Some(lang) = non_empty(engine.source_language) {
                target.source_language = lang;
            }
            if let Some(lang) = non_empty(engine.target_language) {
                target.target_language = lang;
            }
        }
        if let Some(overlay) = incoming.overlay {
            let target = &mut self.engine;
            if let Some(show_original) = overlay.show_original {
                target.show_original = show_original;
            }
            if let Some(opacity) = overlay.opacity.filter(|value| in_range(*value, OPACITY_RANGE)) {
                target.opacity = opacity;
            }
            if let Some(size) = overlay
                .font_size
                .filter(|value| (FONT_SIZE_RANGE.0..=FONT_SIZE_RANGE.1).contains(value))
            {
                target.font_size = size;
            }
            if let Some(scale) = overlay.ui_scale.filter(|value| in_range(*value, UI_SCALE_RANGE)) {
                target.ui_scale = scale;
            }
        }
        if let Some(scan) = incoming.scan {
            let target = &mut self.scan;
            if let Some(ms) = scan.quiet_period_ms.filter(|value| *value > 0) {
                target.quiet_period = Duration::from_millis(ms);
            }
            if let Some(value) = positive(scan.distance_threshold) {
                target.distance_threshold = value;
            }
            if let Some(value) = positive(scan.evict_before) {
                target.evict_before = value;
            }
            if let Some(value) = positive(scan.evict_after) {
                target.evict_after = value;
            }
            if let Some(secs) = scan.timeout_secs.filter(|value| *value > 0) {
                target.timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = scan.notice_secs.filter(|value| *value > 0) {
                target.notice_ttl = Duration::from_secs(secs);
            }
            if let Some(value) = positive(scan.initial_viewport_height) {
                target.initial_viewport_height = value;
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|value| value.is_finite() && *value > 0.0)
}

fn in_range(value: f32, (min, max): (f32, f32)) -> bool {
    value.is_finite() && value >= min && value <= max
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".manga-overlay-rust"))
        }
    })
}
