//! Placeholdr
//!
//! Download placeholder raster images at a chosen size and format, and keep a
//! list of frequently used sizes ("presets") in sync between every running
//! instance that shares the same storage.
//!
//! # Features
//!
//! - **Preset store**: ordered, duplicate-free presets persisted through a
//!   [`backend::KvBackend`] and reconciled with changes made elsewhere
//! - **Conversion pipeline**: fetch, decode and re-encode into PNG, JPEG or
//!   WebP, compositing transparency over white for formats without alpha
//! - **Download dispatch**: hand the final payload to a
//!   [`download::DownloadDispatcher`]
//!
//! # Example
//!
//! ```no_run
//! use placeholdr::backend::MemoryBackend;
//! use placeholdr::download::FileDispatcher;
//! use placeholdr::{App, Config};
//! use std::sync::Arc;
//!
//! # async fn run() -> placeholdr::Result<()> {
//! let config = Config::default();
//! let backend = Arc::new(MemoryBackend::new());
//! let dispatcher = Arc::new(FileDispatcher::new("downloads", &config)?);
//! let app = App::start(config, backend, dispatcher).await?;
//!
//! app.store().add(300, 200, Default::default()).await;
//! let id = app.submit_download(300, 200, Some("jpg")).await;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

use serde::Deserialize;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod app;
pub mod backend;
pub mod download;
pub mod format;
pub mod pipeline;
pub mod preset;
pub mod store;

pub use app::{App, DownloadNotice};
pub use format::TargetFormat;
pub use preset::{Preset, PresetList};
pub use store::{AddOptions, PresetStore};

/// Configuration shared by the store, pipeline and dispatcher
///
/// The defaults match the hosted placeholder service and the behaviour users
/// expect out of the box:
/// - presets live under the `presets` key
/// - the service returns PNG, so PNG downloads skip re-encoding
/// - lossy encodes use a 0.92 quality factor
///
/// # Examples
///
/// ```
/// let cfg = placeholdr::Config::default();
/// assert_eq!(cfg.storage_key, "presets");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the placeholder image service; `{w}x{h}` is appended
    pub image_service_base: String,
    /// Backend key holding the serialised preset list
    pub storage_key: String,
    /// Encoding the image service returns without conversion
    pub native_format: TargetFormat,
    /// Quality factor for lossy encodings, 0.0 to 1.0
    pub jpeg_quality: f32,
    /// Download name template; `{w}`, `{h}` and `{format}` are substituted
    pub filename_template: String,
    /// Ask the dispatcher to prompt for a save location
    pub prompt_user_for_location: bool,
    /// Attempts per preset-list write before giving up
    pub write_attempts: u32,
    /// Delay between write attempts in milliseconds
    pub write_retry_delay_ms: u64,
    /// How often the file backend looks for foreign writes, in milliseconds
    pub poll_interval_ms: u64,
    /// HTTP timeout in milliseconds (0 => none)
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_service_base: "https://fpoimg.com/".to_string(),
            storage_key: "presets".to_string(),
            native_format: TargetFormat::Png,
            jpeg_quality: 0.92,
            filename_template: "placeholder_{w}x{h}.{format}".to_string(),
            prompt_user_for_location: false,
            write_attempts: 3,
            write_retry_delay_ms: 200,
            poll_interval_ms: 500,
            timeout_ms: 30000,
        }
    }
}

impl Config {
    /// Load a JSON config file; missing fields take their defaults
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jpeg_quality) {
            return Err(Error::ConfigError(format!(
                "jpeg_quality must be within 0..=1, got {}",
                self.jpeg_quality
            )));
        }
        if self.storage_key.is_empty() {
            return Err(Error::ConfigError("storage_key must not be empty".into()));
        }
        if self.write_attempts == 0 {
            return Err(Error::ConfigError("write_attempts must be at least 1".into()));
        }
        url::Url::parse(&self.image_service_base)?;
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Encoder quality on the 1..=100 scale used by the JPEG encoder
    pub fn jpeg_quality_percent(&self) -> u8 {
        (self.jpeg_quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8
    }
}

/// URL of the generated placeholder for a size, e.g. `https://fpoimg.com/300x200`
pub fn image_url(base: &str, w: u32, h: u32) -> Result<String> {
    let mut base = url::Url::parse(base)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(&format!("{}x{}", w, h))?.to_string())
}

/// Reduce free-form input to a positive integer: non-digits are dropped and
/// anything below 1 is rejected.
pub fn sanitize_dimension(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u32>() {
        Ok(v) if v >= 1 => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.native_format, TargetFormat::Png);
        assert_eq!(config.jpeg_quality_percent(), 92);
        assert!(!config.prompt_user_for_location);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_config_keeps_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"storage_key": "sizes", "native_format": "webp"}"#).unwrap();
        assert_eq!(cfg.storage_key, "sizes");
        assert_eq!(cfg.native_format, TargetFormat::Webp);
        assert_eq!(cfg.write_attempts, 3);
    }

    #[test]
    fn invalid_quality_is_rejected() {
        let cfg = Config {
            jpeg_quality: 1.5,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_image_url() {
        assert_eq!(
            image_url("https://fpoimg.com/", 300, 200).unwrap(),
            "https://fpoimg.com/300x200"
        );
        assert_eq!(
            image_url("http://127.0.0.1:9000/img", 1, 2).unwrap(),
            "http://127.0.0.1:9000/img/1x2"
        );
        assert!(image_url("not a url", 1, 1).is_err());
    }

    #[test]
    fn test_sanitize_dimension() {
        assert_eq!(sanitize_dimension("300px"), Some(300));
        assert_eq!(sanitize_dimension("1a2b"), Some(12));
        assert_eq!(sanitize_dimension("0"), None);
        assert_eq!(sanitize_dimension("-5"), Some(5));
        assert_eq!(sanitize_dimension("abc"), None);
        assert_eq!(sanitize_dimension(""), None);
    }
}
