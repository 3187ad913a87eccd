use tokenvault_crypto::{decrypt_bytes, encrypt_bytes, MasterKey};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [64, 65536, 1048576])]
fn bench_encrypt_stream(bencher: divan::Bencher, size: usize) {
    let master = MasterKey::from_bytes([0xABu8; 32]);
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            encrypt_bytes(
                divan::black_box(&master),
                b"tokens",
                divan::black_box(&data),
            )
            .unwrap()
        });
}

#[divan::bench(args = [64, 65536, 1048576])]
fn bench_decrypt_stream(bencher: divan::Bencher, size: usize) {
    let master = MasterKey::from_bytes([0xABu8; 32]);
    let data = make_data(size);
    let encrypted = encrypt_bytes(&master, b"tokens", &data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            decrypt_bytes(
                divan::black_box(&master),
                b"tokens",
                divan::black_box(&encrypted),
            )
            .unwrap()
        });
}

fn main() {
    divan::main();
}
