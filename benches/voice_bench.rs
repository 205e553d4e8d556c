//! Rendering throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use js80p::synth::Synth;

fn render_chord(synth: &mut Synth, rounds: u64, block: usize) -> f32 {
    let mut acc = 0.0f32;

    for round in 1..=rounds {
        let buffer = synth.generate_samples(round, block);
        acc += buffer[0][0];
    }

    acc
}

fn bench_polyphonic_render(criterion: &mut Criterion) {
    criterion.bench_function("render 8 voices, 100 blocks of 256", |bencher| {
        bencher.iter_batched(
            || {
                let mut synth = Synth::new();

                for (index, note) in [48u8, 52, 55, 60, 64, 67, 72, 76].iter().enumerate() {
                    synth.note_on(index as f64 * 0.001, 0, *note, 0.8);
                }

                synth
            },
            |mut synth| black_box(render_chord(&mut synth, 100, 256)),
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_silent_render(criterion: &mut Criterion) {
    criterion.bench_function("render silence, 100 blocks of 256", |bencher| {
        bencher.iter_batched(
            || Synth::new(),
            |mut synth| black_box(render_chord(&mut synth, 100, 256)),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_polyphonic_render, bench_silent_render);
criterion_main!(benches);
