use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use cellmqtt::{Client, ClientInfo, Event, QoS, Transport};
use criterion::{BatchSize, Criterion, Throughput};
use rand::{Rng, SeedableRng, rngs::StdRng};

#[derive(Default)]
struct Script {
    rx: VecDeque<u8>,
    ack_publishes: bool,
}

/// In-memory link: always open, swallows outbound bytes, and optionally
/// answers every QoS 1 PUBLISH with a matching PUBACK.
#[derive(Clone)]
struct BenchLink(Rc<RefCell<Script>>);

impl Transport for BenchLink {
    type Error = ();

    fn open(&mut self, _host: &str, _port: u16) -> Result<(), Self::Error> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut script = self.0.borrow_mut();
        if script.ack_publishes {
            // Bench frames are small: the remaining length fits one byte.
            let mut at = 0;
            while at + 1 < buf.len() {
                let header = buf[at];
                let remaining = buf[at + 1] as usize;
                if header & 0xF0 == 0x30 && header & 0x06 != 0 {
                    let topic_len = u16::from_be_bytes([buf[at + 2], buf[at + 3]]) as usize;
                    let id_at = at + 4 + topic_len;
                    script.rx.extend([0x40, 0x02, buf[id_at], buf[id_at + 1]]);
                }
                at += 2 + remaining;
            }
        }
        Ok(buf.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut script = self.0.borrow_mut();
        let mut n = 0;
        while n < buf.len() {
            match script.rx.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn is_open(&mut self) -> bool {
        true
    }
}

fn sink(_arg: Option<u32>, _event: &Event<'_, u32>) {}

type BenchClient = Client<'static, BenchLink, u32, 1024, 1024>;

fn connected_pair() -> (BenchClient, BenchLink) {
    let link = BenchLink(Rc::new(RefCell::new(Script::default())));
    let mut client: BenchClient = Client::new(link.clone());
    client
        .connect("broker.invalid", 1883, ClientInfo::new("bench"), sink)
        .expect("connect refused");
    client.tick(0);
    link.0.borrow_mut().rx.extend([0x20, 0x02, 0x00, 0x00]);
    client.tick(1);
    assert!(client.is_connected());
    (client, link)
}

pub fn bench_publish_qos0(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_qos0");
    let mut payload = [0u8; 64];
    StdRng::seed_from_u64(7).fill(&mut payload[..]);
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("publish_qos0", |b| {
        b.iter_batched_ref(
            connected_pair,
            |(client, _link)| {
                client
                    .publish("bench/topic", &payload, QoS::AtMostOnce, false, None)
                    .expect("publish failed");
                client.tick(2);
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_publish_qos1_acked(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_qos1_acked");
    let mut payload = [0u8; 64];
    StdRng::seed_from_u64(7).fill(&mut payload[..]);
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("publish_qos1_acked", |b| {
        b.iter_batched_ref(
            || {
                let (client, link) = connected_pair();
                link.0.borrow_mut().ack_publishes = true;
                (client, link)
            },
            |(client, _link)| {
                client
                    .publish("bench/topic", &payload, QoS::AtLeastOnce, false, None)
                    .expect("publish failed");
                client.tick(2); // drains the frame; the scripted ack comes back
                client.tick(3); // consumes the PUBACK, freeing the slot
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_inbound_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound_publish");
    let mut frame = vec![0x30, 77, 0x00, 11];
    frame.extend_from_slice(b"bench/topic");
    let mut payload = [0u8; 64];
    StdRng::seed_from_u64(11).fill(&mut payload[..]);
    frame.extend_from_slice(&payload);
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("inbound_publish", |b| {
        b.iter_batched_ref(
            connected_pair,
            |(client, link)| {
                link.0.borrow_mut().rx.extend(frame.iter().copied());
                client.tick(2);
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}
