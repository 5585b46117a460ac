//! Criterion benchmarks for the YMSG binary codec and fragment merge.
//!
//! Run with:
//! ```bash
//! cargo bench --package ymsg-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ymsg_core::protocol::codec::{decode_packet, encode_packet};
use ymsg_core::{FragmentBuffer, Packet, PacketBody, ServiceType};

// ── Packet fixtures ───────────────────────────────────────────────────────────

fn make_ping() -> Packet {
    Packet::new(ServiceType::Ping, PacketBody::new())
}

fn make_message() -> Packet {
    Packet::new(
        ServiceType::Message,
        PacketBody::new()
            .with("1", "alice")
            .with("5", "bob")
            .with("14", "hello there, are you around later today?")
            .with("97", "1"),
    )
}

/// LOGON carrying `n` friend sections (parallel keys 7/10/19).
fn make_logon(n: usize) -> Packet {
    let mut body = PacketBody::new().with("0", "alice").with("1", "alice");
    for i in 0..n {
        body.push("7", format!("friend{i}"));
        body.push("10", "0");
        body.push("19", "at my desk");
    }
    Packet::new(ServiceType::Logon, body).with_session_id(0x1234_5678)
}

fn list_fragment(buddies: &str, terminal: bool) -> Packet {
    let mut body = PacketBody::new().with("87", buddies);
    if terminal {
        body.push("59", "Y\tv=1&n=cookie");
    }
    Packet::new(ServiceType::List, body)
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn fixtures() -> Vec<(&'static str, Packet)> {
    vec![
        ("Ping", make_ping()),
        ("Message", make_message()),
        ("Logon(10)", make_logon(10)),
        ("Logon(200)", make_logon(200)),
    ]
}

/// Benchmarks `encode_packet` for representative packet shapes.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_packet");
    for (name, packet) in fixtures() {
        group.bench_with_input(BenchmarkId::new("packet", name), &packet, |b, packet| {
            b.iter(|| encode_packet(black_box(packet)).expect("encode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks `decode_packet` from pre-encoded bytes.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_packet");
    for (name, packet) in fixtures() {
        let bytes = encode_packet(&packet).expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("packet", name), &bytes, |b, bytes| {
            b.iter(|| decode_packet(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks reassembly of a roster split into three LIST fragments.
fn bench_list_reassembly(c: &mut Criterion) {
    let chunk = "Friends:".to_string() + &"buddy,".repeat(300);
    c.bench_function("list_reassembly_3_fragments", |b| {
        b.iter(|| {
            let mut buffer = FragmentBuffer::for_list();
            buffer.offer(list_fragment(black_box(&chunk), false));
            buffer.offer(list_fragment(black_box(&chunk), false));
            buffer
                .offer(list_fragment(black_box(&chunk), true))
                .expect("terminal fragment completes the list")
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_list_reassembly);
criterion_main!(benches);
