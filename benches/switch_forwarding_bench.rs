use criterion::{black_box, criterion_group, criterion_main, Criterion};
use switchcore::eth::frame::parse;
use switchcore::eth::plugins::mac_learn::MacLearn;

fn ethernet_ipv4_udp_frame(dst_mac: [u8; 6], src_mac: [u8; 6]) -> Vec<u8> {
    let mut data = vec![0u8; 14 + 20 + 8];
    data[0..6].copy_from_slice(&dst_mac);
    data[6..12].copy_from_slice(&src_mac);
    data[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    data[14] = 0x45;
    data[14 + 9] = 17; // UDP
    data[14 + 8] = 64; // ttl
    data
}

fn criterion_benchmark(c: &mut Criterion) {
    let frame = ethernet_ipv4_udp_frame([0xAA; 6], [0xBB; 6]);

    c.bench_function("eth::frame::parse", |b| {
        b.iter(|| {
            let pkt = parse(black_box(&frame));
            black_box(pkt)
        })
    });

    let learn = MacLearn::new(256);
    c.bench_function("MacLearn::process learned hit", |b| {
        let mut warm = parse(&frame).unwrap();
        learn.process(&mut warm, 0);
        b.iter(|| {
            let mut pkt = parse(black_box(&frame)).unwrap();
            learn.process(&mut pkt, black_box(1));
            black_box(pkt.dst_mask)
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
