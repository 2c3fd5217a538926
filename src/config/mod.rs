//! Application Configuration
//!
//! OCR and verification settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::verify::{TagPolicy, VerificationPolicy};
use crate::vision::MatchOptions;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OCR engine settings
    pub ocr: OcrSettings,
    /// Verification settings
    pub verification: VerificationSettings,
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Path to the tesseract binary, or `None` to look it up on PATH
    pub tesseract_path: Option<String>,
    /// Tesseract language code (e.g., "eng")
    pub language: String,
    /// Tesseract page segmentation mode
    pub page_segmentation_mode: u8,
    /// Recognition timeout in milliseconds, `None` waits forever
    pub timeout_ms: Option<u64>,
    /// Minimum similarity (0.0 - 1.0) for fuzzy tag matching, `None` for strict only
    pub fuzzy_similarity: Option<f64>,
    /// Image preprocessing before recognition
    pub preprocessing: OcrPreprocessing,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            language: "eng".to_string(),
            page_segmentation_mode: 3,
            timeout_ms: Some(60_000),
            fuzzy_similarity: None,
            preprocessing: OcrPreprocessing::default(),
        }
    }
}

impl OcrSettings {
    /// Binary to execute
    pub fn binary(&self) -> &str {
        self.tesseract_path.as_deref().unwrap_or("tesseract")
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            fuzzy_similarity: self.fuzzy_similarity,
        }
    }
}

/// Image preprocessing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrPreprocessing {
    /// Whether preprocessing runs at all
    pub enabled: bool,
    /// Convert to grayscale
    pub grayscale: bool,
    /// Upscale until the short side reaches this many pixels
    pub min_dimension: u32,
    /// Never upscale by more than this factor
    pub max_scale: u32,
}

impl Default for OcrPreprocessing {
    fn default() -> Self {
        Self {
            enabled: false,
            grayscale: true,
            min_dimension: 1000,
            max_scale: 3,
        }
    }
}

/// Verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    /// Tags that must appear in the shared post
    pub required_tags: Vec<String>,
    /// Minimum confidence (0 - 100)
    pub threshold: u8,
    /// Whether any or all required tags must pass
    pub policy: TagPolicy,
    /// Failed attempts before manual override is offered
    pub override_after_attempts: u32,
    /// Pause before reporting success, in milliseconds
    pub success_delay_ms: u64,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            required_tags: vec!["@devfest".to_string(), "#devfest".to_string()],
            threshold: 70,
            policy: TagPolicy::Any,
            override_after_attempts: 2,
            success_delay_ms: 600,
        }
    }
}

impl VerificationSettings {
    pub fn policy(&self) -> VerificationPolicy {
        VerificationPolicy::new(self.threshold, self.policy)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
