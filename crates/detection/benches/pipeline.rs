use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use detection::decode::{self, DecodedImage, ImageKind};
use detection::engine::InferenceOutput;
use detection::postprocessing::{PostProcessor, Threshold};
use detection::{LabelCatalog, tensor};
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use std::sync::Arc;

/// Mid-gray RGB image of the given size
fn create_test_image(width: u32, height: u32) -> DecodedImage {
    DecodedImage {
        width,
        height,
        kind: ImageKind::Png,
        pixels: vec![128u8; (width * height * 3) as usize],
    }
}

fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 64]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// Mock SSD output with `num_detections` confident slots out of `max_objects`
fn create_mock_ssd_output(max_objects: usize, num_detections: usize) -> InferenceOutput {
    let mut scores = vec![0.01f32; max_objects];
    let mut classes = vec![1.0f32; max_objects];
    for i in 0..num_detections.min(max_objects) {
        scores[i] = 0.9;
        classes[i] = ((i % 80) + 1) as f32;
    }

    InferenceOutput {
        scores,
        classes,
        boxes: vec![[0.1, 0.2, 0.5, 0.6]; max_objects],
    }
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for (width, height) in [(320, 240), (640, 480)] {
        let png = create_test_png(width, height);
        group.bench_with_input(
            BenchmarkId::new("png", format!("{}x{}", width, height)),
            &png,
            |b, png| b.iter(|| decode::decode(black_box(png)).unwrap()),
        );
    }

    group.finish();
}

fn benchmark_tensor_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("tensor_build");

    let resolutions = [(640, 480), (1280, 720), (1920, 1080)];

    for (width, height) in resolutions.iter() {
        let image = create_test_image(*width, *height);

        group.bench_with_input(
            BenchmarkId::new("nhwc_u8", format!("{}x{}", width, height)),
            &image,
            |b, image| b.iter(|| tensor::build(black_box(image.clone())).unwrap()),
        );
    }

    group.finish();
}

fn benchmark_postprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("postprocessing");
    let labels: LabelCatalog = (1..=80u32).map(|id| (id, format!("class_{id}"))).collect();
    let post_processor = PostProcessor::new(Arc::new(labels));
    let threshold = Threshold::saturating(50);

    for num_detections in [0, 5, 20, 100] {
        let output = create_mock_ssd_output(100, num_detections);

        group.bench_with_input(
            BenchmarkId::new("process", num_detections),
            &output,
            |b, output| {
                b.iter(|| {
                    post_processor
                        .process(black_box(output), black_box(threshold))
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_decode,
    benchmark_tensor_build,
    benchmark_postprocessing
);
criterion_main!(benches);
