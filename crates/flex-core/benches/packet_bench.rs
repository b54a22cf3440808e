use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use flex_core::packet::{Address, Cmd, Packet};
use flex_core::port::PortAllocator;

fn data_packet(len: usize) -> Packet {
    Packet::new(
        Cmd::PushStreamData.code(),
        Address::new(2, 8),
        Address::new(1, 49152),
        vec![0x5A; len],
    )
}

fn bench_packet_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_codec");

    for size in [0usize, 1024, 16 * 1024, 65535] {
        let packet = data_packet(size);
        let wire = packet.encode().unwrap();
        group.throughput(Throughput::Bytes(wire.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &packet, |b, p| {
            let mut buf = Vec::with_capacity(p.encoded_len());
            b.iter(|| {
                buf.clear();
                black_box(p).encode_into(&mut buf).unwrap();
            })
        });

        group.bench_with_input(BenchmarkId::new("decode", size), &wire, |b, w| {
            b.iter(|| Packet::decode(black_box(w)).unwrap())
        });
    }

    group.finish();
}

fn bench_port_allocator(c: &mut Criterion) {
    c.bench_function("port_allocate_release", |b| {
        let mut ports = PortAllocator::default();
        b.iter(|| {
            let port = ports.allocate().unwrap();
            ports.release(black_box(port));
        })
    });

    c.bench_function("port_allocate_half_full", |b| {
        let mut ports = PortAllocator::default();
        for _ in 0..8192 {
            ports.allocate().unwrap();
        }
        b.iter(|| {
            let port = ports.allocate().unwrap();
            ports.release(port);
        })
    });
}

criterion_group!(benches, bench_packet_codec, bench_port_allocator);
criterion_main!(benches);
