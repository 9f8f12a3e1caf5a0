//! Conversion pipeline: fetch a generated placeholder, decode it, and
//! re-encode it in the requested format.
//!
//! The surface always has the bitmap's natural size; nothing is resampled.
//! Formats without an alpha channel get the bitmap drawn over opaque white so
//! transparent regions come out white instead of undefined.

use crate::download::SourceReference;
use crate::{Config, Error, Result, TargetFormat};
use futures::future::BoxFuture;
use image::{DynamicImage, GenericImageView, ImageEncoder, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;

/// Raw bytes returned by an [`ImageSource`]
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Something that can fetch image bytes by URL.
///
/// Implementations must bypass caches and report non-success responses as
/// [`Error::FetchFailed`].
pub trait ImageSource: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Fetched>>;
}

/// HTTP image source backed by `reqwest`
#[cfg(feature = "http")]
pub struct HttpSource {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpSource {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("placeholdr/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
impl ImageSource for HttpSource {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Fetched>> {
        use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};

        Box::pin(async move {
            log::debug!("GET {}", url);
            let res = self
                .client
                .get(url)
                .header(CACHE_CONTROL, "no-cache, no-store")
                .header(PRAGMA, "no-cache")
                .send()
                .await
                .map_err(|e| Error::Network(format!("HTTP GET {} failed: {}", url, e)))?;

            let status = res.status();
            if !status.is_success() {
                return Err(Error::FetchFailed {
                    status: status.as_u16(),
                });
            }
            let content_type = res
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = res
                .bytes()
                .await
                .map_err(|e| Error::Network(format!("Failed to read response body: {}", e)))?;
            Ok(Fetched {
                bytes: bytes.to_vec(),
                content_type,
            })
        })
    }
}

/// A download to produce
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source_url: String,
    pub target_format: TargetFormat,
    pub filename_template: String,
}

/// Encoded payload ready to be written
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub encoded_blob: Vec<u8>,
    pub mime_type: &'static str,
    /// False when the fetched bytes were passed through untouched
    pub reencoded: bool,
    /// Quality factor handed to a lossy encoder; `None` for lossless output
    pub quality: Option<u8>,
}

pub struct Pipeline {
    source: Arc<dyn ImageSource>,
    native_format: TargetFormat,
    quality: u8,
}

impl Pipeline {
    pub fn new(source: Arc<dyn ImageSource>, config: &Config) -> Self {
        Self {
            source,
            native_format: config.native_format,
            quality: config.jpeg_quality_percent(),
        }
    }

    /// Whether `format` is what the image source already serves
    pub fn is_native(&self, format: TargetFormat) -> bool {
        format == self.native_format
    }

    /// Fetch `source_url` and produce bytes in `target`. When `target` is
    /// the native format the fetched bytes are returned as-is.
    pub async fn convert(&self, source_url: &str, target: TargetFormat) -> Result<ConversionResult> {
        let fetched = self.source.fetch(source_url).await?;
        if self.is_native(target) {
            log::debug!("{} is already {}, skipping re-encode", source_url, target);
            return Ok(ConversionResult {
                encoded_blob: fetched.bytes,
                mime_type: target.mime_type(),
                reencoded: false,
                quality: None,
            });
        }

        let quality = self.quality;
        let applied = target.is_lossy().then_some(quality);
        let bytes = fetched.bytes;
        let encoded = tokio::task::spawn_blocking(move || transcode(&bytes, target, quality))
            .await
            .map_err(|e| Error::EncodeFailed(format!("conversion task failed: {}", e)))??;
        log::debug!("Converted {} to {} ({} bytes)", source_url, target, encoded.len());
        Ok(ConversionResult {
            encoded_blob: encoded,
            mime_type: target.mime_type(),
            reencoded: true,
            quality: applied,
        })
    }

    /// Resolve a request into what the dispatcher should save. Native
    /// requests are not fetched here at all: the dispatcher receives the URL
    /// and saves the served bytes directly.
    pub async fn prepare(&self, request: &ConversionRequest) -> Result<SourceReference> {
        if self.is_native(request.target_format) {
            return Ok(SourceReference::Url(request.source_url.clone()));
        }
        let result = self
            .convert(&request.source_url, request.target_format)
            .await?;
        Ok(SourceReference::Blob {
            bytes: result.encoded_blob,
            mime_type: result.mime_type.to_string(),
        })
    }
}

/// Decode `bytes`, composite for `target` and encode.
pub fn transcode(bytes: &[u8], target: TargetFormat, quality: u8) -> Result<Vec<u8>> {
    let bitmap = image::load_from_memory(bytes).map_err(|e| Error::DecodeFailed(e.to_string()))?;
    let surface = draw_surface(&bitmap, target);
    encode_surface(surface, target, quality)
}

/// Draw `bitmap` onto a surface of its natural size, over opaque white when
/// `target` cannot store alpha.
pub fn draw_surface(bitmap: &DynamicImage, target: TargetFormat) -> RgbaImage {
    let pixels = bitmap.to_rgba8();
    if target.supports_alpha() {
        return pixels;
    }
    let (width, height) = bitmap.dimensions();
    let mut surface = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut surface, &pixels, 0, 0);
    surface
}

/// Encode a surface. `quality` (1..=100) only affects lossy formats.
pub fn encode_surface(surface: RgbaImage, target: TargetFormat, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = surface.dimensions();
    let mut out = Vec::new();
    let res = match target {
        TargetFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(surface).to_rgb8();
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality).write_image(
                rgb.as_raw(),
                width,
                height,
                image::ExtendedColorType::Rgb8,
            )
        }
        TargetFormat::Png | TargetFormat::Webp => {
            DynamicImage::ImageRgba8(surface).write_to(&mut Cursor::new(&mut out), target.image_format())
        }
    };
    res.map_err(|e| Error::EncodeFailed(format!("{} encode failed: {}", target, e)))?;
    Ok(out)
}
