//! Wiring: one running instance with its store, pipeline and dispatcher.

use crate::backend::KvBackend;
use crate::download::{render_filename, DownloadDispatcher, DownloadId, DownloadRequest};
use crate::pipeline::{ConversionRequest, ImageSource, Pipeline};
use crate::{image_url, Config, Error, PresetStore, Result, TargetFormat};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The single user-facing outcome of a failed download submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadNotice {
    /// Width/height missing or not positive
    InvalidInput,
    /// Fetch, decode or encode failed; details are only logged
    Failed,
    /// The dispatcher refused or failed the write
    Dispatcher(String),
}

impl fmt::Display for DownloadNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadNotice::InvalidInput => f.write_str("Please enter a valid width and height."),
            DownloadNotice::Failed => f.write_str("An error occurred while downloading."),
            DownloadNotice::Dispatcher(msg) => write!(f, "Download error: {}", msg),
        }
    }
}

impl std::error::Error for DownloadNotice {}

pub struct App {
    config: Config,
    store: Arc<PresetStore>,
    pipeline: Pipeline,
    dispatcher: Arc<dyn DownloadDispatcher>,
    sync_task: JoinHandle<()>,
}

impl App {
    /// Build an instance fetching images over HTTP and initialise it
    #[cfg(feature = "http")]
    pub async fn start(
        config: Config,
        backend: Arc<dyn KvBackend>,
        dispatcher: Arc<dyn DownloadDispatcher>,
    ) -> Result<Self> {
        let source = Arc::new(crate::pipeline::HttpSource::new(&config)?);
        let app = Self::new(config, backend, source, dispatcher)?;
        app.initialize().await?;
        Ok(app)
    }

    /// Build an instance and start following backend changes. The preset
    /// list stays empty (but usable) until [`App::initialize`] completes.
    pub fn new(
        config: Config,
        backend: Arc<dyn KvBackend>,
        source: Arc<dyn ImageSource>,
        dispatcher: Arc<dyn DownloadDispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(PresetStore::new(backend, &config));
        // Subscribe before loading so nothing written meanwhile is missed
        let sync_task = store.spawn_sync();
        let pipeline = Pipeline::new(source, &config);
        Ok(Self {
            config,
            store,
            pipeline,
            dispatcher,
            sync_task,
        })
    }

    /// Load, seed and reconcile the preset list
    pub async fn initialize(&self) -> Result<()> {
        self.store.reconcile_on_start().await
    }

    pub fn store(&self) -> &Arc<PresetStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn conversion_request(&self, w: u32, h: u32, format: Option<&str>) -> Result<ConversionRequest> {
        if w == 0 || h == 0 {
            return Err(Error::InvalidDimension(format!("{}x{}", w, h)));
        }
        Ok(ConversionRequest {
            source_url: image_url(&self.config.image_service_base, w, h)?,
            target_format: TargetFormat::resolve(format),
            filename_template: self.config.filename_template.clone(),
        })
    }

    /// Produce and dispatch one download. Every pipeline failure collapses
    /// into [`DownloadNotice::Failed`]; the cause is logged.
    pub async fn submit_download(
        &self,
        w: u32,
        h: u32,
        format: Option<&str>,
    ) -> std::result::Result<DownloadId, DownloadNotice> {
        let request = match self.conversion_request(w, h, format) {
            Ok(r) => r,
            Err(Error::InvalidDimension(_)) => return Err(DownloadNotice::InvalidInput),
            Err(e) => {
                log::error!("Cannot build download request: {}", e);
                return Err(DownloadNotice::Failed);
            }
        };

        let source = self.pipeline.prepare(&request).await.map_err(|e| {
            if e.is_pipeline_failure() {
                log::warn!("Download of {} failed: {}", request.source_url, e);
            } else {
                log::error!("Download of {} failed unexpectedly: {}", request.source_url, e);
            }
            DownloadNotice::Failed
        })?;

        let filename = render_filename(&request.filename_template, w, h, request.target_format);
        self.dispatcher
            .download(DownloadRequest {
                source,
                suggested_filename: filename,
                prompt_user_for_location: self.config.prompt_user_for_location,
            })
            .await
            .map_err(|e| {
                log::error!("Dispatcher failed: {}", e);
                match e {
                    Error::Download(msg) => DownloadNotice::Dispatcher(msg),
                    other => DownloadNotice::Dispatcher(other.to_string()),
                }
            })
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.sync_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::download::SourceReference;
    use crate::pipeline::Fetched;
    use futures::future::BoxFuture;
    use std::sync::Mutex;

    struct FailingSource;

    impl ImageSource for FailingSource {
        fn fetch<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<Fetched>> {
            Box::pin(async { Err(Error::FetchFailed { status: 500 }) })
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        requests: Mutex<Vec<DownloadRequest>>,
    }

    impl DownloadDispatcher for RecordingDispatcher {
        fn download<'a>(&'a self, request: DownloadRequest) -> BoxFuture<'a, Result<DownloadId>> {
            let id = {
                let mut reqs = self.requests.lock().unwrap();
                reqs.push(request);
                DownloadId(reqs.len() as u64)
            };
            Box::pin(async move { Ok(id) })
        }
    }

    fn app(dispatcher: Arc<RecordingDispatcher>) -> App {
        App::new(
            Config::default(),
            Arc::new(MemoryBackend::new()),
            Arc::new(FailingSource),
            dispatcher,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn png_download_goes_straight_to_dispatcher() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let app = app(dispatcher.clone());
        let id = app.submit_download(300, 200, None).await.unwrap();
        assert_eq!(id, DownloadId(1));

        let reqs = dispatcher.requests.lock().unwrap();
        assert_eq!(reqs[0].suggested_filename, "placeholder_300x200.png");
        assert_eq!(reqs[0].source, SourceReference::Url("https://fpoimg.com/300x200".into()));
        assert!(!reqs[0].prompt_user_for_location);
    }

    #[tokio::test]
    async fn pipeline_failures_collapse_into_one_notice() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let app = app(dispatcher.clone());
        let notice = app.submit_download(10, 10, Some("jpg")).await.unwrap_err();
        assert_eq!(notice, DownloadNotice::Failed);
        assert_eq!(notice.to_string(), "An error occurred while downloading.");
        assert!(dispatcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_sizes_are_rejected_inline() {
        let app = app(Arc::new(RecordingDispatcher::default()));
        assert_eq!(
            app.submit_download(0, 10, None).await.unwrap_err(),
            DownloadNotice::InvalidInput
        );
    }

    #[tokio::test]
    async fn initialize_seeds_the_store() {
        let app = app(Arc::new(RecordingDispatcher::default()));
        assert!(!app.store().is_initialized());
        app.initialize().await.unwrap();
        assert_eq!(app.store().len(), 3);
    }
}
