//! Benchmarks for group fan-out
//!
//! Performance-critical paths:
//! - `Group::push`: snapshot under the group lock, then enqueue per member
//! - `Group::send`: concurrent awaited writes
//! - `Session::join_group` / `Session::quit_group` churn

use async_trait::async_trait;
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relay_kernel::network::{Conn, MessageKind, NetworkError};
use relay_kernel::session::{Group, Session};
use std::net::SocketAddr;
use std::sync::Arc;

/// Connection that accepts and discards every frame.
struct NullConn(i64);

#[async_trait]
impl Conn for NullConn {
    fn id(&self) -> i64 {
        self.0
    }

    fn bind(&self, _uid: i64) {}

    fn unbind(&self) {}

    async fn send(&self, msg: Bytes, _kind: MessageKind) -> Result<(), NetworkError> {
        black_box(msg);
        Ok(())
    }

    fn push(&self, msg: Bytes, _kind: MessageKind) -> Result<(), NetworkError> {
        black_box(msg);
        Ok(())
    }

    fn close(&self, _force: bool) -> Result<(), NetworkError> {
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 3553)))
    }

    fn remote_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 40000)))
    }
}

fn populated(members: i64) -> (Arc<Group>, Vec<Arc<Session>>) {
    let group = Arc::new(Group::new("bench"));
    let sessions = (0..members)
        .map(|cid| {
            let session = Arc::new(Session::new());
            session.init(Arc::new(NullConn(cid)));
            session.join_group(&[&group]).expect("attached session joins");
            session.bind(cid + 10_000).expect("attached session binds");
            session
        })
        .collect();
    (group, sessions)
}

fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_push");
    let msg = Bytes::from_static(&[0u8; 256]);

    for size in [10, 100, 1000] {
        let (room, _sessions) = populated(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &room, |b, room| {
            b.iter(|| black_box(room.push(&msg, None)));
        });
    }
    group.finish();
}

fn bench_push_to_users(c: &mut Criterion) {
    let (room, _sessions) = populated(1000);
    let uids: Vec<i64> = (0..1000).step_by(10).map(|cid| cid + 10_000).collect();
    let msg = Bytes::from_static(b"targeted");

    c.bench_function("group_push_to_100_of_1000", |b| {
        b.iter(|| black_box(room.push_to(&uids, &msg, None)));
    });
}

fn bench_send(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let (room, _sessions) = populated(100);
    let msg = Bytes::from_static(b"awaited");

    c.bench_function("group_send_100", |b| {
        b.to_async(&runtime).iter(|| room.send(msg.clone(), None));
    });
}

fn bench_membership_churn(c: &mut Criterion) {
    let (room, sessions) = populated(100);

    c.bench_function("join_quit_100", |b| {
        b.iter(|| {
            for session in &sessions {
                session.quit_group(&[&room]);
                session.join_group(&[&room]).expect("attached session joins");
            }
        });
    });
}

criterion_group!(
    benches,
    bench_push,
    bench_push_to_users,
    bench_send,
    bench_membership_churn
);
criterion_main!(benches);
