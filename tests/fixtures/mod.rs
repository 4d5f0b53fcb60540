//! Test fixtures: tiny screenshots and canned OmniParser responses

use base64::Engine;
use serde_json::{json, Value};

/// Smallest byte string `image::guess_format` accepts as PNG.
pub const PNG_SCREENSHOT: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
];

/// JPEG start-of-image marker followed by a JFIF header.
pub const JPEG_SCREENSHOT: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

pub fn png_base64() -> String {
    base64::engine::general_purpose::STANDARD.encode(PNG_SCREENSHOT)
}

/// Body an OmniParser server returns from `POST /parse/`.
pub fn parse_response() -> Value {
    json!({
        "parsed_content_list": [
            {
                "type": "text",
                "bbox": [0.1, 0.1, 0.4, 0.2],
                "interactivity": false,
                "content": "Settings"
            },
            {
                "type": "icon",
                "bbox": [0.5, 0.5, 0.6, 0.6],
                "interactivity": true,
                "content": "gear icon"
            }
        ],
        "som_image_base64": "",
        "latency": 0.05
    })
}
