use criterion::{criterion_group, criterion_main, Criterion};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use placeholdr::pipeline::transcode;
use placeholdr::TargetFormat;
use std::io::Cursor;

// Run with:
//    cargo bench --bench convert_bench

fn source_png(size: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(size, size, |x, y| {
        let alpha = if (x / 16 + y / 16) % 2 == 0 { 0 } else { 255 };
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, alpha])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode source png");
    buf
}

/// Bench: decode + white composite + JPEG encode
fn bench_jpeg(c: &mut Criterion) {
    let png = source_png(512);
    c.bench_function("transcode_512_jpeg", |b| {
        b.iter(|| transcode(&png, TargetFormat::Jpeg, 92).unwrap())
    });
}

/// Bench: decode + lossless WebP encode (no composite)
fn bench_webp(c: &mut Criterion) {
    let png = source_png(512);
    c.bench_function("transcode_512_webp", |b| {
        b.iter(|| transcode(&png, TargetFormat::Webp, 92).unwrap())
    });
}

criterion_group!(benches, bench_jpeg, bench_webp);
criterion_main!(benches);
