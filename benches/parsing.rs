//! Benchmarks for upstream frame decoding

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use market_fanout::exchanges::parsing::BinanceParser;

// Real combined-stream frame formats
const KLINE_EVENT: &[u8] = br#"{"stream":"btcusdt@kline_1s","data":{"e":"kline","E":1672515782136,"s":"BTCUSDT","k":{"t":1672515780000,"T":1672515780999,"s":"BTCUSDT","i":"1s","f":100,"L":200,"o":"16500.10","c":"16500.50","h":"16501.00","l":"16499.90","v":"1.25","n":100,"x":false,"q":"20625.6","V":"0.5","Q":"8250.2","B":"0"}}}"#;

const SUBSCRIPTION_ACK: &[u8] = br#"{"result":null,"id":7}"#;

const EXCHANGE_ERROR: &[u8] = br#"{"error":{"code":2,"msg":"Invalid request"},"id":7}"#;

fn bench_kline_decode(c: &mut Criterion) {
    let frame = Bytes::from_static(KLINE_EVENT);
    let mut group = c.benchmark_group("binance_decode");
    group.throughput(Throughput::Bytes(KLINE_EVENT.len() as u64));

    group.bench_function("kline", |b| {
        b.iter(|| {
            let result = BinanceParser::decode(black_box(&frame));
            black_box(result)
        })
    });

    group.finish();
}

fn bench_control_decode(c: &mut Criterion) {
    let ack = Bytes::from_static(SUBSCRIPTION_ACK);
    let error = Bytes::from_static(EXCHANGE_ERROR);
    let mut group = c.benchmark_group("binance_decode");

    group.bench_function("ack", |b| {
        b.iter(|| black_box(BinanceParser::decode(black_box(&ack))))
    });

    group.bench_function("error", |b| {
        b.iter(|| black_box(BinanceParser::decode(black_box(&error))))
    });

    group.finish();
}

criterion_group!(benches, bench_kline_decode, bench_control_decode);
criterion_main!(benches);
