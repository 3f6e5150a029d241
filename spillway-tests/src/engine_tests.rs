//! Full engine runs: workload verification under pressure and faults.

use std::sync::Arc;
use std::time::Duration;

use spillway_core::{Message, StreamId};
use spillway_engine::{BufferEngine, FlushFaultConfig, SimulatedFlushTarget};
use spillway_workload::{SizeDistribution, Workload, WorkloadError};

use crate::properties::DiagnosticsChecker;
use crate::scenarios::configs;
use crate::scenarios::seeds::REGRESSION_SEEDS;

fn stream(name: &str) -> StreamId {
    StreamId::new("it", name).unwrap()
}

#[tokio::test]
async fn test_engine_workload_under_memory_pressure() {
    for &seed in &REGRESSION_SEEDS[..3] {
        let target = SimulatedFlushTarget::new(32 * 1024);
        let mut workload = Workload::builder()
            .seed(seed)
            .streams(6)
            .records(2_000)
            .message_size(SizeDistribution::Uniform { min: 64, max: 2048 })
            .state_every(50)
            .global_state_every(300)
            .build();

        let report = workload.run(configs::tight_memory(), &target).await.unwrap();

        assert!(report.passed(), "seed {seed}: {:?}", report.violations);
        assert!(report.stats().backpressure_waits > 0, "seed {seed}");
        assert_eq!(report.stats().records_flushed, 2_000, "seed {seed}");
        assert_eq!(report.shutdown.pending_states, 0, "seed {seed}");
    }
}

#[tokio::test]
async fn test_engine_workload_roomy_memory() {
    let target = SimulatedFlushTarget::new(64 * 1024);
    let mut workload = Workload::builder()
        .seed(3)
        .streams(16)
        .records(3_000)
        .message_size(SizeDistribution::Fixed(256))
        .build();

    let report = workload.run(configs::roomy(), &target).await.unwrap();
    assert!(report.passed(), "{:?}", report.violations);
    assert_eq!(report.stats().backpressure_waits, 0);
}

#[tokio::test]
async fn test_engine_worker_concurrency_bounded() {
    let target = SimulatedFlushTarget::with_faults(
        16 * 1024,
        0,
        FlushFaultConfig::none().with_latency(Duration::from_millis(2)),
    );
    let config = configs::tight_memory();
    let pool_size = config.worker_pool_size;
    let engine = BufferEngine::new(config, Arc::new(target.clone())).unwrap();
    engine.start().unwrap();

    let mut checker = DiagnosticsChecker::new();
    for i in 0..1_500 {
        let name = format!("s{}", i % 10);
        engine
            .submit(Message::record(stream(&name), vec![0u8; 512]))
            .await
            .unwrap();
        checker.record(&engine.diagnostics(), pool_size);
    }
    let report = engine.close().await.unwrap();

    assert!(report.clean);
    assert!(checker.violations().is_empty(), "{:?}", checker.violations());
    assert!(checker.peak_memory_bytes() <= 256 * 1024);
    assert!(target.peak_in_flight() <= u64::from(pool_size));
    assert_eq!(target.delivered_count(), 1_500);
}

#[tokio::test]
async fn test_engine_single_worker_delivers_in_order() {
    let target = SimulatedFlushTarget::new(8 * 1024);
    let engine = BufferEngine::new(configs::single_worker(), Arc::new(target.clone())).unwrap();
    engine.start().unwrap();

    for i in 0..1_000 {
        let name = if i % 4 == 0 { "minor" } else { "major" };
        engine
            .submit(Message::record(stream(name), format!("{i:08}")))
            .await
            .unwrap();
    }
    assert!(engine.close().await.unwrap().clean);

    // With one worker, acceptance order at the target is admission order.
    for name in ["minor", "major"] {
        let delivered = target.delivered(&stream(name));
        assert!(!delivered.is_empty());
        assert!(
            delivered.windows(2).all(|w| w[0].seq() < w[1].seq()),
            "{name} delivered out of order"
        );
    }
    assert_eq!(target.delivered_count(), 1_000);
}

#[tokio::test]
async fn test_engine_stale_stream_flushed_without_close() {
    let target = SimulatedFlushTarget::new(64 * 1024);
    let engine = BufferEngine::new(configs::roomy(), Arc::new(target.clone())).unwrap();
    engine.start().unwrap();

    engine
        .submit(Message::record(stream("quiet"), "only record"))
        .await
        .unwrap();

    // Well under the size threshold; only staleness can flush it.
    for _ in 0..100 {
        if target.delivered_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(target.delivered_count(), 1);
    assert!(engine.close().await.unwrap().clean);
}

#[tokio::test]
async fn test_engine_random_flush_failures_fail_the_run() {
    let target = SimulatedFlushTarget::with_faults(
        8 * 1024,
        99,
        FlushFaultConfig::none().with_flush_fail_rate(0.5),
    );
    let mut workload = Workload::builder().seed(99).streams(4).records(1_000).build();

    let err = workload
        .run(configs::tight_memory(), &target)
        .await
        .unwrap_err();
    match err {
        WorkloadError::Engine(err) => assert!(err.is_flush_failure(), "{err}"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(target.failed_calls() > 0);
}
