use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use lan_video_monitor::receiver::render_test_pattern;

fn bench_test_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("test_pattern");

    for &(width, height) in &[(320u32, 240u32), (720, 480), (1280, 720)] {
        group.throughput(Throughput::Bytes(width as u64 * height as u64 * 4));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &(width, height),
            |b, &(w, h)| {
                let mut index = 0u64;
                b.iter(|| {
                    index += 1;
                    black_box(render_test_pattern(w, h, index, index as f32 / 30.0))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_test_pattern);
criterion_main!(benches);
