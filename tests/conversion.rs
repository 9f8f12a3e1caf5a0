//! End-to-end downloads against a local placeholder service

#![cfg(feature = "http")]

use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use placeholdr::backend::MemoryBackend;
use placeholdr::download::FileDispatcher;
use placeholdr::pipeline::{HttpSource, Pipeline};
use placeholdr::{App, Config, DownloadNotice, Error, TargetFormat};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tiny_http::{Header, Response, Server};

/// `WxH` PNG whose top half is fully transparent and bottom half opaque blue
fn placeholder_png(w: u32, h: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(w, h, |_, y| {
        if y < h / 2 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([0, 0, 255, 255])
        }
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

struct TestService {
    base: String,
    hits: Arc<AtomicUsize>,
}

/// Serve `/{w}x{h}` as PNG, `/broken/...` as garbage, anything else as 404
fn start_test_server() -> TestService {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            counter.fetch_add(1, Ordering::SeqCst);
            let path = request.url().trim_start_matches('/').to_string();
            let size = path
                .split_once('x')
                .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)));
            let response = match (path.as_str(), size) {
                (p, _) if p.starts_with("broken/") => Response::from_data(b"<html>oops</html>".to_vec())
                    .with_header("Content-Type: image/png".parse::<Header>().unwrap()),
                (_, Some((w, h))) => Response::from_data(placeholder_png(w, h))
                    .with_header("Content-Type: image/png".parse::<Header>().unwrap()),
                _ => Response::from_data(b"Not Found".to_vec()).with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });

    TestService {
        base: format!("http://{}/", addr),
        hits,
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("placeholdr-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn config_for(service: &TestService) -> Config {
    Config {
        image_service_base: service.base.clone(),
        timeout_ms: 5000,
        ..Default::default()
    }
}

async fn start_app(service: &TestService, dir: &PathBuf) -> (App, Arc<FileDispatcher>) {
    let config = config_for(service);
    let dispatcher = Arc::new(FileDispatcher::new(dir, &config).unwrap());
    let app = App::start(config, Arc::new(MemoryBackend::new()), dispatcher.clone())
        .await
        .unwrap();
    (app, dispatcher)
}

#[tokio::test]
async fn jpeg_download_has_transparency_composited_white() {
    let service = start_test_server();
    let dir = temp_dir("jpeg");
    let (app, dispatcher) = start_app(&service, &dir).await;

    let id = app.submit_download(40, 40, Some("jpg")).await.unwrap();
    let path = dispatcher.path_of(id).unwrap();
    assert_eq!(path, dir.join("placeholder_40x40.jpg"));

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!(decoded.dimensions(), (40, 40));
    assert!(!decoded.color().has_alpha());

    let rgb = decoded.to_rgb8();
    let top = rgb.get_pixel(20, 4).0;
    let bottom = rgb.get_pixel(20, 36).0;
    assert!(top.iter().all(|&c| c > 230), "transparent area should be white, got {:?}", top);
    assert!(bottom[2] > 200 && bottom[0] < 60, "opaque area should stay blue, got {:?}", bottom);
}

#[tokio::test]
async fn png_download_saves_served_bytes_untouched() {
    let service = start_test_server();
    let dir = temp_dir("png");
    let (app, dispatcher) = start_app(&service, &dir).await;

    let id = app.submit_download(30, 10, Some("png")).await.unwrap();
    let saved = std::fs::read(dispatcher.path_of(id).unwrap()).unwrap();
    assert_eq!(saved, placeholder_png(30, 10));
    // fetched exactly once, by the dispatcher
    assert_eq!(service.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_format_downloads_png() {
    let service = start_test_server();
    let dir = temp_dir("bmp");
    let (app, dispatcher) = start_app(&service, &dir).await;

    let id = app.submit_download(8, 8, Some("bmp")).await.unwrap();
    let path = dispatcher.path_of(id).unwrap();
    assert_eq!(path, dir.join("placeholder_8x8.png"));
    assert_eq!(image::guess_format(&std::fs::read(path).unwrap()).unwrap(), ImageFormat::Png);
}

#[tokio::test]
async fn webp_download_keeps_alpha() {
    let service = start_test_server();
    let dir = temp_dir("webp");
    let (app, dispatcher) = start_app(&service, &dir).await;

    let id = app.submit_download(16, 16, Some("webp")).await.unwrap();
    let bytes = std::fs::read(dispatcher.path_of(id).unwrap()).unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::WebP);
    let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
    assert_eq!(decoded.get_pixel(0, 0).0[3], 0);
    assert_eq!(decoded.get_pixel(0, 15).0, [0, 0, 255, 255]);
}

#[tokio::test]
async fn http_errors_surface_status_and_single_notice() {
    let service = start_test_server();
    let config = Config {
        image_service_base: format!("{}missing/", service.base),
        ..config_for(&service)
    };

    let pipeline = Pipeline::new(Arc::new(HttpSource::new(&config).unwrap()), &config);
    let err = pipeline
        .convert(&format!("{}missing/", service.base), TargetFormat::Jpeg)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FetchFailed { status: 404 }));

    let dir = temp_dir("missing");
    let dispatcher = Arc::new(FileDispatcher::new(&dir, &config).unwrap());
    let app = App::start(config, Arc::new(MemoryBackend::new()), dispatcher)
        .await
        .unwrap();
    // lossy request fails inside the pipeline
    assert_eq!(
        app.submit_download(5, 5, Some("jpeg")).await.unwrap_err(),
        DownloadNotice::Failed
    );
    // native request fails inside the dispatcher
    match app.submit_download(5, 5, Some("png")).await.unwrap_err() {
        DownloadNotice::Dispatcher(msg) => assert!(msg.contains("404"), "{}", msg),
        other => panic!("unexpected notice {:?}", other),
    }
}

#[tokio::test]
async fn undecodable_response_is_a_decode_failure() {
    let service = start_test_server();
    let config = config_for(&service);
    let pipeline = Pipeline::new(Arc::new(HttpSource::new(&config).unwrap()), &config);
    let err = pipeline
        .convert(&format!("{}broken/1x1", service.base), TargetFormat::Webp)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DecodeFailed(_)));
}
