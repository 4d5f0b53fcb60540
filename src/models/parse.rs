use garde::Validate;
use serde::{Deserialize, Serialize};

/// OCR tuning forwarded verbatim to the OmniParser instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ParseOptions {
    /// `true` selects PaddleOCR, `false` EasyOCR.
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_paddleocr: Option<bool>,

    #[garde(range(min = 0.0, max = 1.0))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_threshold: Option<f64>,

    #[garde(range(min = 0.0, max = 1.0))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_threshold: Option<f64>,

    #[garde(range(min = 0.0, max = 1.0))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iou_threshold: Option<f64>,
}

/// One UI element detected on a screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    pub bbox: Vec<f64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub interactive: bool,
    pub confidence: f64,
}

/// Parsed output of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub elements: Vec<UiElement>,
    /// Base64-encoded set-of-marks image, when the instance returned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
    /// Latency reported by the instance itself, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_latency: Option<f64>,
}
