//! Priority frontier queue
//!
//! A per-job, deduplicated, bucketed set of pending requests. Buckets
//! rank plan-directed work above acquisition above discovery; within a
//! bucket, order is priority, then simulated value, then enqueue order,
//! which makes the total order deterministic for identical input
//! sequences. `dequeue_ready` only hands out requests whose host the
//! pacer permits right now.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use parking_lot::Mutex;

use crate::pacer::HostPacer;
use crate::storage::{QueueAction, Storage};
use crate::urlstore::UrlId;

/// Where a request came from; decides its bucket and base priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestSource {
    /// Nav/sitemap breadth
    Discovery,
    /// Expected article
    ArticleCandidate,
    /// Expected valuable hub
    HubCandidate,
    /// Contributed by a confirmed plan
    PlanDirected,
}

/// The three scheduling buckets, lowest to highest priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBucket {
    Discovery = 0,
    Acquisition = 1,
    PlanDirected = 2,
}

impl RequestSource {
    #[must_use]
    pub fn bucket(&self) -> QueueBucket {
        match self {
            Self::Discovery => QueueBucket::Discovery,
            Self::ArticleCandidate | Self::HubCandidate => QueueBucket::Acquisition,
            Self::PlanDirected => QueueBucket::PlanDirected,
        }
    }
}

/// One pending fetch
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub url_id: UrlId,
    pub host: String,
    pub priority: f64,
    pub depth: u32,
    pub source: RequestSource,
    pub job_id: i64,
    /// Simulated value from the tactical planner, if any
    pub expected_value: Option<f64>,
}

/// Deterministic within-bucket ordering key.
///
/// Priority and value are scaled to integers; ties fall back to enqueue
/// sequence so identical input sequences replay identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    neg_priority_milli: i64,
    neg_value_milli: i64,
    seq: u64,
}

impl OrderKey {
    fn new(priority: f64, expected_value: Option<f64>, seq: u64) -> Self {
        Self {
            neg_priority_milli: -(priority * 1000.0) as i64,
            neg_value_milli: -(expected_value.unwrap_or(0.0) * 1000.0) as i64,
            seq,
        }
    }
}

struct Inner {
    buckets: [BTreeMap<OrderKey, PendingRequest>; 3],
    /// url → (bucket index, key); enforces one pending entry per URL
    pending: HashMap<UrlId, (usize, OrderKey)>,
    /// url → shallowest depth at which it was handed out
    visited: HashMap<UrlId, u32>,
    seq: u64,
}

/// The frontier for one crawl job
pub struct FrontierQueue {
    job_id: i64,
    inner: Mutex<Inner>,
}

impl FrontierQueue {
    /// Empty frontier for a job
    #[must_use]
    pub fn new(job_id: i64) -> Self {
        Self {
            job_id,
            inner: Mutex::new(Inner {
                buckets: [BTreeMap::new(), BTreeMap::new(), BTreeMap::new()],
                pending: HashMap::new(),
                visited: HashMap::new(),
                seq: 0,
            }),
        }
    }

    /// Rebuild a frontier from a job's persisted queue events.
    ///
    /// A URL is pending if its latest events contain a
    /// `discovered`/`enqueued` with no later settling action. Replay is
    /// idempotent: duplicate events collapse onto one entry.
    pub async fn rehydrate(job_id: i64, storage: &Storage) -> crate::error::Result<Self> {
        let queue = Self::new(job_id);
        queue.reload(storage).await?;
        Ok(queue)
    }

    /// Replace this frontier's contents from persisted queue events.
    /// Used on resume so workers keep their shared handle.
    pub async fn reload(&self, storage: &Storage) -> crate::error::Result<()> {
        let events = storage.queue_events(self.job_id).await?;
        let mut pending_depth: HashMap<UrlId, u32> = HashMap::new();
        let mut settled: HashMap<UrlId, u32> = HashMap::new();
        for event in events {
            match event.action {
                QueueAction::Discovered | QueueAction::Enqueued => {
                    pending_depth.entry(event.url_id).or_insert(event.depth);
                }
                action if action.is_terminal() => {
                    pending_depth.remove(&event.url_id);
                    let entry = settled.entry(event.url_id).or_insert(event.depth);
                    *entry = (*entry).min(event.depth);
                }
                _ => {}
            }
        }
        {
            let mut inner = self.inner.lock();
            inner.buckets = [BTreeMap::new(), BTreeMap::new(), BTreeMap::new()];
            inner.pending.clear();
            inner.visited = settled;
            inner.seq = 0;
        }
        // Rehydrated entries lose their original source annotation; they
        // re-enter through the acquisition bucket with a depth-scaled
        // priority so resumed work still precedes fresh discovery.
        let mut by_url: Vec<(UrlId, u32)> = pending_depth.into_iter().collect();
        by_url.sort();
        for (url_id, depth) in by_url {
            let host = storage.url_host(url_id).await?.unwrap_or_default();
            self.enqueue(PendingRequest {
                url_id,
                host,
                priority: 50.0 / f64::from(depth + 1),
                depth,
                source: RequestSource::ArticleCandidate,
                job_id: self.job_id,
                expected_value: None,
            });
        }
        Ok(())
    }

    /// Add a request. Returns false if the URL is already pending or was
    /// already handed out at this depth or shallower.
    pub fn enqueue(&self, req: PendingRequest) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending.contains_key(&req.url_id) {
            return false;
        }
        if let Some(seen_depth) = inner.visited.get(&req.url_id) {
            if *seen_depth <= req.depth {
                return false;
            }
        }
        let bucket_idx = req.source.bucket() as usize;
        let key = OrderKey::new(req.priority, req.expected_value, inner.seq);
        inner.seq += 1;
        inner.pending.insert(req.url_id, (bucket_idx, key));
        inner.buckets[bucket_idx].insert(key, req);
        true
    }

    /// Hand out the best request whose host the pacer permits now.
    ///
    /// The handed-out URL is marked visited at its depth so a later
    /// re-discovery at the same or greater depth is deduplicated.
    pub fn dequeue_ready(&self, now: Instant, pacer: &HostPacer) -> Option<PendingRequest> {
        let mut inner = self.inner.lock();
        for bucket_idx in (0..3).rev() {
            let ready_key = inner.buckets[bucket_idx]
                .iter()
                .find(|(_, req)| pacer.is_ready(&req.host, now))
                .map(|(k, _)| *k);
            if let Some(key) = ready_key {
                let req = inner.buckets[bucket_idx].remove(&key)?;
                inner.pending.remove(&req.url_id);
                let depth = req.depth;
                inner
                    .visited
                    .entry(req.url_id)
                    .and_modify(|d| *d = (*d).min(depth))
                    .or_insert(depth);
                return Some(req);
            }
        }
        None
    }

    /// Instant the earliest pending host becomes available, for idle waits
    #[must_use]
    pub fn next_wakeup(&self, pacer: &HostPacer) -> Option<Instant> {
        let inner = self.inner.lock();
        inner
            .buckets
            .iter()
            .flat_map(|b| b.values())
            .map(|req| pacer.next_allowed(&req.host))
            .min()
    }

    /// Pending counts per bucket `(discovery, acquisition, plan-directed)`
    #[must_use]
    pub fn size_by_bucket(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        (
            inner.buckets[0].len(),
            inner.buckets[1].len(),
            inner.buckets[2].len(),
        )
    }

    /// Total pending
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// True when nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct hosts with pending work
    #[must_use]
    pub fn domains(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let set: HashSet<&str> = inner
            .buckets
            .iter()
            .flat_map(|b| b.values())
            .map(|req| req.host.as_str())
            .collect();
        let mut hosts: Vec<String> = set.into_iter().map(String::from).collect();
        hosts.sort();
        hosts
    }

    /// Pending requests targeting one host
    #[must_use]
    pub fn pending_for_host(&self, host: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .buckets
            .iter()
            .flat_map(|b| b.values())
            .filter(|req| req.host == host)
            .count()
    }

    /// Number of URLs handed out so far
    #[must_use]
    pub fn visited_count(&self) -> usize {
        self.inner.lock().visited.len()
    }

    /// The job this frontier belongs to
    #[must_use]
    pub fn job_id(&self) -> i64 {
        self.job_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacer::PacerConfig;
    use std::time::Duration;

    fn open_pacer() -> HostPacer {
        HostPacer::new(PacerConfig {
            min_interval: Duration::ZERO,
            backoff_ceiling: Duration::from_secs(1),
            max_in_flight: 8,
        })
    }

    fn req(url: i64, source: RequestSource, priority: f64) -> PendingRequest {
        PendingRequest {
            url_id: UrlId(url),
            host: "example.com".to_string(),
            priority,
            depth: 1,
            source,
            job_id: 1,
            expected_value: None,
        }
    }

    #[test]
    fn enqueue_deduplicates_pending() {
        let q = FrontierQueue::new(1);
        assert!(q.enqueue(req(1, RequestSource::Discovery, 10.0)));
        assert!(!q.enqueue(req(1, RequestSource::PlanDirected, 99.0)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn plan_directed_bucket_wins_regardless_of_priority() {
        let q = FrontierQueue::new(1);
        q.enqueue(req(1, RequestSource::Discovery, 100.0));
        q.enqueue(req(2, RequestSource::HubCandidate, 50.0));
        q.enqueue(req(3, RequestSource::PlanDirected, 1.0));
        let pacer = open_pacer();
        let first = q.dequeue_ready(Instant::now(), &pacer).expect("entry");
        assert_eq!(first.url_id, UrlId(3));
        let second = q.dequeue_ready(Instant::now(), &pacer).expect("entry");
        assert_eq!(second.url_id, UrlId(2));
    }

    #[test]
    fn within_bucket_order_is_priority_then_seq() {
        let q = FrontierQueue::new(1);
        q.enqueue(req(1, RequestSource::Discovery, 10.0));
        q.enqueue(req(2, RequestSource::Discovery, 20.0));
        q.enqueue(req(3, RequestSource::Discovery, 20.0));
        let pacer = open_pacer();
        let order: Vec<i64> = (0..3)
            .filter_map(|_| q.dequeue_ready(Instant::now(), &pacer))
            .map(|r| r.url_id.0)
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn dequeued_url_not_re_enqueued_at_same_depth() {
        let q = FrontierQueue::new(1);
        q.enqueue(req(1, RequestSource::Discovery, 10.0));
        let pacer = open_pacer();
        q.dequeue_ready(Instant::now(), &pacer).expect("entry");
        assert!(!q.enqueue(req(1, RequestSource::Discovery, 10.0)));
        // But a strictly shallower rediscovery is allowed.
        let mut shallow = req(1, RequestSource::Discovery, 10.0);
        shallow.depth = 0;
        assert!(q.enqueue(shallow));
    }

    #[test]
    fn paced_host_is_skipped_for_ready_host() {
        let pacer = HostPacer::new(PacerConfig {
            min_interval: Duration::from_secs(60),
            backoff_ceiling: Duration::from_secs(60),
            max_in_flight: 1,
        });
        pacer.begin("slow.com");
        let q = FrontierQueue::new(1);
        let mut blocked = req(1, RequestSource::Discovery, 99.0);
        blocked.host = "slow.com".to_string();
        q.enqueue(blocked);
        let mut open = req(2, RequestSource::Discovery, 1.0);
        open.host = "fast.com".to_string();
        q.enqueue(open);
        let got = q.dequeue_ready(Instant::now(), &pacer).expect("entry");
        assert_eq!(got.url_id, UrlId(2));
        // The paced entry stays queued.
        assert_eq!(q.pending_for_host("slow.com"), 1);
    }
}
