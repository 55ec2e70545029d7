//! Caller-facing option types for page commands.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ScreenshotFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpeg => "jpeg",
            ScreenshotFormat::Webp => "webp",
        }
    }

    pub fn supports_quality(&self) -> bool {
        !matches!(self, ScreenshotFormat::Png)
    }
}

impl std::str::FromStr for ScreenshotFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ScreenshotFormat::Png),
            "jpeg" | "jpg" => Ok(ScreenshotFormat::Jpeg),
            "webp" => Ok(ScreenshotFormat::Webp),
            other => Err(format!("unsupported screenshot format: {other}")),
        }
    }
}

/// Capture region in CSS pixels.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotOptions {
    pub format: ScreenshotFormat,
    /// 0..=100, ignored for PNG.
    pub quality: Option<u8>,
    pub clip: Option<Viewport>,
    /// Resize the viewport to the document before capturing.
    pub full_page: bool,
}

impl ScreenshotOptions {
    pub fn full_page() -> Self {
        Self {
            full_page: true,
            ..Self::default()
        }
    }

    pub(crate) fn capture_params(&self) -> Value {
        let mut params = json!({
            "format": self.format.as_str(),
            "fromSurface": true,
        });
        if let Some(quality) = self.quality.filter(|_| self.format.supports_quality()) {
            params["quality"] = json!(quality.min(100));
        }
        if let Some(clip) = &self.clip {
            params["clip"] = json!(clip);
        }
        params
    }
}
