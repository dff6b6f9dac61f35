use criterion::{criterion_group, criterion_main};

mod client;

criterion_group!(
    benches,
    client::bench_publish_qos0,
    client::bench_publish_qos1_acked,
    client::bench_inbound_publish
);
criterion_main!(benches);
