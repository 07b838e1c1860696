//! QR challenge rendering.
//!
//! The raw pairing challenge is persisted alongside a human-scannable image
//! so dashboards can display it directly. Rendering is a pure function
//! behind a trait; the default implementation produces an SVG data URL.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};

/// Error rendering a QR challenge.
#[derive(Debug, thiserror::Error)]
#[error("qr render error: {0}")]
pub struct QrError(String);

/// Renders a pairing challenge into a displayable image payload.
pub trait QrRenderer: Send + Sync {
    fn to_image(&self, challenge: &str) -> Result<String, QrError>;
}

/// SVG renderer producing a `data:image/svg+xml;base64,...` URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvgQrRenderer;

impl QrRenderer for SvgQrRenderer {
    fn to_image(&self, challenge: &str) -> Result<String, QrError> {
        let code = QrCode::with_error_correction_level(challenge, EcLevel::H)
            .map_err(|e| QrError(e.to_string()))?;
        let image = code
            .render::<svg::Color>()
            .min_dimensions(300, 300)
            .quiet_zone(true)
            .build();
        Ok(format!(
            "data:image/svg+xml;base64,{}",
            STANDARD.encode(image)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_data_url() {
        let url = SvgQrRenderer.to_image("2@abcdefghij,klmnop,1").unwrap();
        assert!(url.starts_with("data:image/svg+xml;base64,"));

        let b64 = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let bytes = STANDARD.decode(b64).unwrap();
        let svg = String::from_utf8(bytes).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn distinct_challenges_render_distinct_images() {
        let a = SvgQrRenderer.to_image("challenge-a").unwrap();
        let b = SvgQrRenderer.to_image("challenge-b").unwrap();
        assert_ne!(a, b);
    }
}
