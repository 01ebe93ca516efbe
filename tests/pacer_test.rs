//! Per-host pacing under worker concurrency

use std::sync::Arc;
use std::time::{Duration, Instant};

use newswire_crawler::pacer::{HostPacer, PaceOutcome, PacerConfig};

/// Three workers, three requests to one host: network starts must be
/// pairwise separated by at least the minimum interval.
#[tokio::test]
async fn concurrent_leases_to_one_host_are_serialised() {
    let pacer = Arc::new(HostPacer::new(PacerConfig {
        min_interval: Duration::from_millis(120),
        backoff_ceiling: Duration::from_secs(5),
        max_in_flight: 1,
    }));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let pacer = Arc::clone(&pacer);
        handles.push(tokio::spawn(async move {
            let lease = pacer.scoped_lease("h.example").await;
            let started = Instant::now();
            lease.complete(PaceOutcome::Success);
            started
        }));
    }

    let mut starts = Vec::new();
    for handle in handles {
        starts.push(handle.await.expect("worker"));
    }
    starts.sort();
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_millis(110),
            "starts separated by only {gap:?}"
        );
    }
}

#[tokio::test]
async fn different_hosts_are_independent() {
    let pacer = Arc::new(HostPacer::new(PacerConfig {
        min_interval: Duration::from_millis(500),
        backoff_ceiling: Duration::from_secs(5),
        max_in_flight: 1,
    }));

    let t0 = Instant::now();
    let lease_a = pacer.scoped_lease("a.example").await;
    lease_a.complete(PaceOutcome::Success);
    let lease_b = pacer.scoped_lease("b.example").await;
    lease_b.complete(PaceOutcome::Success);
    // Neither lease waited on the other's interval.
    assert!(t0.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn backoff_extends_the_gap_after_throttling() {
    let pacer = HostPacer::new(PacerConfig {
        min_interval: Duration::from_millis(20),
        backoff_ceiling: Duration::from_secs(5),
        max_in_flight: 1,
    });
    let lease = pacer.scoped_lease("slow.example").await;
    lease.complete(PaceOutcome::Throttled { retry_after: None });
    let lease = pacer.scoped_lease("slow.example").await;
    lease.complete(PaceOutcome::Throttled { retry_after: None });

    // Two throttles double the gap past the floor.
    let gap = pacer.current_backoff("slow.example");
    assert!(gap >= Duration::from_millis(40), "backoff was {gap:?}");
}

#[tokio::test]
async fn retry_after_is_never_violated() {
    let pacer = HostPacer::new(PacerConfig {
        min_interval: Duration::from_millis(10),
        backoff_ceiling: Duration::from_secs(60),
        max_in_flight: 1,
    });
    pacer.end(
        "h.example",
        PaceOutcome::Throttled {
            retry_after: Some(Duration::from_millis(300)),
        },
    );
    let before = Instant::now();
    let lease = pacer.scoped_lease("h.example").await;
    lease.complete(PaceOutcome::Success);
    assert!(before.elapsed() >= Duration::from_millis(290));
}

#[tokio::test]
async fn in_flight_cap_blocks_second_lease() {
    let pacer = Arc::new(HostPacer::new(PacerConfig {
        min_interval: Duration::ZERO,
        backoff_ceiling: Duration::from_secs(1),
        max_in_flight: 1,
    }));
    let first = pacer.scoped_lease("h.example").await;

    let pacer2 = Arc::clone(&pacer);
    let second = tokio::spawn(async move {
        let lease = pacer2.scoped_lease("h.example").await;
        lease.complete(PaceOutcome::Success);
        Instant::now()
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    let released = Instant::now();
    first.complete(PaceOutcome::Success);
    let second_start = second.await.expect("second lease");
    assert!(second_start >= released);
}
