//! QR payloads for share URLs.
//!
//! A [`QrPayload`] is the encoded form of a share URL (or any string). It
//! can be rendered for a terminal, embedded in a page as SVG, or shipped as
//! a base64 PNG data URL.
//!
//! ```
//! use netshare_core::share::QrPayload;
//!
//! let qr = QrPayload::new("https://netshare.local/file/abc").unwrap();
//! assert!(qr.to_svg().contains("<svg"));
//! ```

use base64::Engine;
use qrcode::render::{svg, unicode};
use qrcode::{EcLevel, QrCode};

use crate::error::{Error, Result};

/// An encoded QR code together with the data it carries.
#[derive(Clone)]
pub struct QrPayload {
    data: String,
    code: QrCode,
}

impl std::fmt::Debug for QrPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrPayload")
            .field("data", &self.data)
            .field("width", &self.code.width())
            .finish()
    }
}

impl QrPayload {
    /// Encode `data` with medium error correction.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is too long to fit in a QR code.
    pub fn new(data: impl Into<String>) -> Result<Self> {
        let data = data.into();
        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)
            .map_err(|e| Error::InvalidInput(format!("Failed to generate QR code: {e}")))?;
        Ok(Self { data, code })
    }

    /// The encoded string.
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Number of modules per side.
    #[must_use]
    pub fn width(&self) -> usize {
        self.code.width()
    }

    /// Unicode half-block rendering for terminals.
    #[must_use]
    pub fn to_ascii(&self) -> String {
        self.code
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build()
    }

    /// SVG document, at least 200x200.
    #[must_use]
    pub fn to_svg(&self) -> String {
        self.code
            .render::<svg::Color<'_>>()
            .min_dimensions(200, 200)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#ffffff"))
            .build()
    }

    /// Base64-encoded PNG of `size` x `size` pixels.
    ///
    /// # Errors
    ///
    /// Returns an error if PNG encoding fails.
    pub fn to_png_base64(&self, size: u32) -> Result<String> {
        use image::{ImageEncoder, Luma};

        let size = size.max(1);
        let image = self.code.render::<Luma<u8>>().build();
        let scaled =
            image::imageops::resize(&image, size, size, image::imageops::FilterType::Nearest);

        let mut png_bytes = Vec::new();
        image::codecs::png::PngEncoder::new(&mut png_bytes)
            .write_image(&scaled, size, size, image::ExtendedColorType::L8)
            .map_err(|e| Error::Internal(format!("Failed to encode PNG: {e}")))?;

        Ok(base64::prelude::BASE64_STANDARD.encode(&png_bytes))
    }

    /// `data:image/png;base64,...` URL for embedding in HTML.
    ///
    /// # Errors
    ///
    /// Returns an error if PNG encoding fails.
    pub fn to_data_url(&self, size: u32) -> Result<String> {
        Ok(format!("data:image/png;base64,{}", self.to_png_base64(size)?))
    }
}
