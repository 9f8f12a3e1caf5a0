//! Download dispatch: the last hop that writes a payload to disk.

use crate::pipeline::ImageSource;
use crate::{Config, Error, Result, TargetFormat};
use base64::Engine as _;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type PromptHandler = Arc<dyn Fn(&Path) -> Option<PathBuf> + Send + Sync>;

/// What to save: a URL to fetch, or bytes already in memory
#[derive(Debug, Clone, PartialEq)]
pub enum SourceReference {
    /// `http(s)://` or `data:` URL
    Url(String),
    Blob { bytes: Vec<u8>, mime_type: String },
}

impl SourceReference {
    /// `data:` URL form of a blob (URLs are returned unchanged)
    pub fn to_data_url(&self) -> String {
        match self {
            SourceReference::Url(u) => u.clone(),
            SourceReference::Blob { bytes, mime_type } => format!(
                "data:{};base64,{}",
                mime_type,
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ),
        }
    }
}

/// Split a `data:` URL into its MIME type and decoded payload
pub fn parse_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| Error::Download(format!("not a data URL: {:.32}", url)))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::Download("data URL without payload".into()))?;
    match meta.strip_suffix(";base64") {
        Some(mime) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(payload)
                .map_err(|e| Error::Download(format!("bad base64 payload: {}", e)))?;
            Ok((mime.to_string(), bytes))
        }
        None => Ok((meta.to_string(), payload.as_bytes().to_vec())),
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source: SourceReference,
    pub suggested_filename: String,
    pub prompt_user_for_location: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownloadId(pub u64);

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Performs the actual write of a download
pub trait DownloadDispatcher: Send + Sync {
    fn download<'a>(&'a self, request: DownloadRequest) -> BoxFuture<'a, Result<DownloadId>>;
}

/// Fill a filename template: `{w}`, `{h}` and `{format}` (the extension).
pub fn render_filename(template: &str, w: u32, h: u32, format: TargetFormat) -> String {
    template
        .replace("{w}", &w.to_string())
        .replace("{h}", &h.to_string())
        .replace("{format}", format.extension())
}

/// `dir/name`, or `dir/stem (n).ext` for the first free `n`
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = as_path.extension().map(|e| e.to_string_lossy().into_owned());
    (1u32..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
            None => dir.join(format!("{} ({})", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Saves downloads into a directory
pub struct FileDispatcher {
    dir: PathBuf,
    source: Arc<dyn ImageSource>,
    next_id: AtomicU64,
    prompt: Mutex<Option<PromptHandler>>,
    completed: Mutex<HashMap<DownloadId, PathBuf>>,
}

impl FileDispatcher {
    /// Dispatcher that fetches URL sources over HTTP
    #[cfg(feature = "http")]
    pub fn new(dir: impl Into<PathBuf>, config: &Config) -> Result<Self> {
        let source = Arc::new(crate::pipeline::HttpSource::new(config)?);
        Ok(Self::with_source(dir, source))
    }

    pub fn with_source(dir: impl Into<PathBuf>, source: Arc<dyn ImageSource>) -> Self {
        Self {
            dir: dir.into(),
            source,
            next_id: AtomicU64::new(1),
            prompt: Mutex::new(None),
            completed: Mutex::new(HashMap::new()),
        }
    }

    /// Register the callback asked for a location when a request sets
    /// `prompt_user_for_location`. It receives the default path and returns
    /// the chosen one, or `None` to cancel.
    pub fn on_prompt<F>(&self, cb: F)
    where
        F: Fn(&Path) -> Option<PathBuf> + Send + Sync + 'static,
    {
        *self.prompt.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(cb));
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where a finished download was written
    pub fn path_of(&self, id: DownloadId) -> Option<PathBuf> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    async fn resolve_bytes(&self, source: SourceReference) -> Result<Vec<u8>> {
        match source {
            SourceReference::Blob { bytes, .. } => Ok(bytes),
            SourceReference::Url(url) if url.starts_with("data:") => Ok(parse_data_url(&url)?.1),
            SourceReference::Url(url) => Ok(self.source.fetch(&url).await?.bytes),
        }
    }

    async fn save(&self, request: DownloadRequest) -> Result<DownloadId> {
        // Only the final component is honoured; no writing outside `dir`
        let name = Path::new(&request.suggested_filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::Download(format!("invalid filename {:?}", request.suggested_filename))
            })?;

        let bytes = self.resolve_bytes(request.source).await?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let mut target = unique_path(&self.dir, &name);
        if request.prompt_user_for_location {
            let handler = self
                .prompt
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            match handler {
                Some(cb) => {
                    target = cb(&target).ok_or_else(|| Error::Download("cancelled".into()))?;
                }
                None => log::warn!("No location prompt registered, saving to {}", target.display()),
            }
        }

        tokio::fs::write(&target, &bytes).await?;
        let id = DownloadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::info!("Download {} saved to {} ({} bytes)", id, target.display(), bytes.len());
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, target);
        Ok(id)
    }
}

impl DownloadDispatcher for FileDispatcher {
    fn download<'a>(&'a self, request: DownloadRequest) -> BoxFuture<'a, Result<DownloadId>> {
        Box::pin(async move {
            self.save(request).await.map_err(|e| match e {
                Error::Download(_) => e,
                other => Error::Download(other.to_string()),
            })
        })
    }
}
