//! Supported download encodings

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raster encodings a download can be produced in.
///
/// Unknown selectors resolve to [`TargetFormat::Png`] rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 3] = [TargetFormat::Png, TargetFormat::Jpeg, TargetFormat::Webp];

    /// Resolve a user-facing selector (`"png"`, `"jpg"`, `"JPEG"`, ...).
    /// Absent or unrecognised selectors fall back to PNG.
    pub fn resolve(selector: Option<&str>) -> Self {
        let Some(raw) = selector else {
            return TargetFormat::Png;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" => TargetFormat::Png,
            "jpeg" | "jpg" => TargetFormat::Jpeg,
            "webp" => TargetFormat::Webp,
            other => {
                log::debug!("Unknown format selector {:?}, using png", other);
                TargetFormat::Png
            }
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            TargetFormat::Png => "image/png",
            TargetFormat::Jpeg => "image/jpeg",
            TargetFormat::Webp => "image/webp",
        }
    }

    /// File extension used for download names
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Png => "png",
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Webp => "webp",
        }
    }

    /// Whether the encoding can carry an alpha channel. Formats without one
    /// are composited over opaque white before encoding.
    pub fn supports_alpha(self) -> bool {
        match self {
            TargetFormat::Png | TargetFormat::Webp => true,
            TargetFormat::Jpeg => false,
        }
    }

    /// Whether the encoder honours a quality factor
    pub fn is_lossy(self) -> bool {
        matches!(self, TargetFormat::Jpeg)
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            TargetFormat::Png => image::ImageFormat::Png,
            TargetFormat::Jpeg => image::ImageFormat::Jpeg,
            TargetFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
