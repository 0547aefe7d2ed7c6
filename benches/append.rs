//! Append path microbenchmarks
//!
//! Run with: cargo bench --bench append

use criterion::{
  black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use tempfile::tempdir;

extern crate logmesh;

use logmesh::log::{Entry, LogHandle};
use logmesh::{
  CreateOptions, EntryHash, LogCoordinator, LogLibrary, LogName, LogOptions, LogType, NodeOptions,
  PeerIdentity, PeerNode, RetryPolicy, Swarm,
};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
  tokio::runtime::Builder::new_multi_thread()
    .worker_threads(2)
    .enable_all()
    .build()
    .expect("expected runtime")
}

fn open_log(rt: &Runtime, node_options: NodeOptions, log_options: LogOptions) -> LogHandle {
  rt.block_on(async {
    let node = PeerNode::start(node_options, &Swarm::new()).expect("expected node");
    let coordinator = LogCoordinator::new(LogLibrary::new(node, log_options).expect("expected library"));
    coordinator
      .open_or_create(
        &LogName::new("bench").expect("expected name"),
        LogType::EventLog,
        &CreateOptions::new(),
        RetryPolicy::none(),
      )
      .await
      .expect("expected log")
  })
}

fn bench_append(c: &mut Criterion) {
  let rt = runtime();
  let mut group = c.benchmark_group("append");
  group.sample_size(10);

  for count in [100usize, 1000usize].iter() {
    group.throughput(Throughput::Elements(*count as u64));

    group.bench_with_input(BenchmarkId::new("memory", count), count, |bencher, &count| {
      bencher.iter_batched(
        || open_log(&rt, NodeOptions::new(), LogOptions::new()),
        |handle| {
          rt.block_on(async {
            for index in 0..count {
              black_box(handle.append(format!("entry-{index}")).await.expect("expected append"));
            }
          });
        },
        BatchSize::PerIteration,
      );
    });

    group.bench_with_input(BenchmarkId::new("disk", count), count, |bencher, &count| {
      bencher.iter_batched(
        || {
          let dir = tempdir().expect("expected tempdir");
          let handle = open_log(
            &rt,
            NodeOptions::new().repo_dir(dir.path().join("node")),
            LogOptions::new().directory(dir.path().join("log")),
          );
          (dir, handle)
        },
        |(_dir, handle)| {
          rt.block_on(async {
            for index in 0..count {
              black_box(handle.append(format!("entry-{index}")).await.expect("expected append"));
            }
          });
        },
        BatchSize::PerIteration,
      );
    });
  }

  group.finish();
}

fn bench_entry_codec(c: &mut Criterion) {
  let mut group = c.benchmark_group("entry_codec");
  let log_id = EntryHash::digest(b"bench");
  let identity = PeerIdentity::random();
  let next: Vec<EntryHash> = (0..4u8).map(|index| EntryHash::digest(&[index])).collect();

  for size in [64usize, 4096usize].iter() {
    group.throughput(Throughput::Bytes(*size as u64));
    let (_, bytes) =
      Entry::create(log_id, identity, 7, next.clone(), vec![0xAB; *size]).expect("expected entry");

    group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |bencher, bytes| {
      bencher.iter(|| black_box(Entry::decode(black_box(bytes)).expect("expected decode")));
    });
  }

  group.finish();
}

criterion_group!(benches, bench_append, bench_entry_codec);
criterion_main!(benches);
