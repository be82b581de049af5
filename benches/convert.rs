use camera_trigger::image::{convert, Image, PixelFormat};
use criterion::{criterion_group, criterion_main, Criterion};

pub fn benchmark_convert(c: &mut Criterion) {
    let pairs = [
        (PixelFormat::Yuv422, PixelFormat::Mono8),
        (PixelFormat::Yuv422, PixelFormat::Rgb8),
        (PixelFormat::Rgb8, PixelFormat::Mono8),
        (PixelFormat::Rgb8, PixelFormat::Bgr8),
    ];
    let dims = [
        (320, 240),
        (640, 480),
        (1280, 1024),
        (1920, 1080),
        (3840, 2160),
    ];

    for (src_fmt, dst_fmt) in pairs {
        let mut group = c.benchmark_group(format!("convert/{src_fmt}-{dst_fmt}"));
        for dim in dims.iter() {
            let src = Image::new(dim.1, dim.0, src_fmt);
            group.bench_with_input(format!("{}x{}", dim.0, dim.1), &src, |b, src| {
                b.iter(|| convert(&src.view(), dst_fmt).unwrap())
            });
        }
        group.finish();
    }
}

criterion_group!(benches, benchmark_convert);
criterion_main!(benches);
