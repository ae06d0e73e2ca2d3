//! Mailbox hot-path benchmarks

use criterion::{criterion_group, criterion_main, Criterion};

use collsim_core::{BufferKind, ChannelKey, Mailbox, MailboxManager, Message};

fn message(width: usize) -> Message {
    Message {
        chunks: (0..width).map(|i| format!("0_{i}")).collect(),
        src_buf: BufferKind::Input,
        src_off: 0,
        dst_buf: BufferKind::Output,
        dst_off: 0,
    }
}

fn bench_send_receive(c: &mut Criterion) {
    let mailbox = Mailbox::default();
    let msg = message(64);
    c.bench_function("mailbox_send_receive_64", |b| {
        b.iter(|| {
            mailbox.send(msg.clone());
            mailbox.receive().unwrap()
        })
    });
}

fn bench_rendezvous(c: &mut Criterion) {
    c.bench_function("manager_rendezvous_pair", |b| {
        b.iter(|| {
            let manager = MailboxManager::new();
            let key = ChannelKey {
                send_rank: 0,
                recv_rank: 1,
                chan: 0,
            };
            manager.send_mailbox(key);
            manager.recv_mailbox(key).unwrap()
        })
    });
}

criterion_group!(benches, bench_send_receive, bench_rendezvous);
criterion_main!(benches);
