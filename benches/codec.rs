use criterion::{criterion_group, criterion_main, Criterion};
use karst_vm::binary::{decode_module, encode_module};
use karst_vm::fuzzing::generate_module;
use karst_vm::ir::FeatureSpec;
use karst_vm::validate::validate_module;

fn bench_codec(c: &mut Criterion) {
    let seed: Vec<u8> = (0..4096u32)
        .map(|i| (i.wrapping_mul(2654435761) >> 11) as u8)
        .collect();
    let module = generate_module(&seed, FeatureSpec::standard());
    let bytes = encode_module(&module);

    c.bench_function("encode_module", |b| b.iter(|| encode_module(&module)));
    c.bench_function("decode_and_validate_module", |b| {
        b.iter(|| decode_module(&bytes, FeatureSpec::standard()).unwrap())
    });
    c.bench_function("validate_module", |b| b.iter(|| validate_module(&module).unwrap()));
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
