use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Monotonic hex job-id generator, one per pool. `next()` called N times yields N distinct
/// strings (spec §8 round-trip property).
#[derive(Debug, Default)]
pub struct JobIdGenerator {
    counter: AtomicU64,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{id:x}")
    }
}

/// The (extraNonce1, extraNonce2, nTime, nonce) tuple a Job's duplicate-detection set is
/// keyed on (spec §3 invariants).
pub type ShareKey = (String, String, u32, u32);

/// A work package for one block template version (spec §3).
///
/// `template` is opaque to the core; its concrete type is supplied by the coin-specific
/// [`PoolHandler`](crate::job::handler::PoolHandler) implementation.
pub struct Job<T> {
    pub job_id: String,
    pub template: T,
    pub created_at: SystemTime,
    /// Parameters that would be sent in a `mining.notify` for this job (coin-specific shape,
    /// opaque to the core beyond being forwarded verbatim to connections).
    pub notify_params: serde_json::Value,
    seen_shares: std::sync::Mutex<HashSet<ShareKey>>,
}

impl<T> Job<T> {
    pub fn new(job_id: String, template: T, notify_params: serde_json::Value) -> Self {
        Self {
            job_id,
            template,
            created_at: SystemTime::now(),
            notify_params,
            seen_shares: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Register a (extraNonce1, extraNonce2, nTime, nonce) tuple for this job; returns `true`
    /// if it was already present (a duplicate submission).
    pub fn register_share(&self, key: ShareKey) -> bool {
        let mut seen = self.seen_shares.lock().expect("share set mutex poisoned");
        !seen.insert(key)
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed().unwrap_or_default()
    }
}

/// How stale job entries are evicted from the [`JobRegistry`] (spec §3: "cleared on new tip
/// for Bitcoin-like coins; bounded sliding window of 3 heights for Ethereum-like coins").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Every job is discarded the instant a new chain tip is detected.
    ClearOnNewTip,
    /// At most `depth` most-recent tip generations are retained; the oldest generation is
    /// evicted whole once a new one arrives past that depth.
    SlidingWindow { depth: usize },
}

/// jobId → Job mapping for one pool (spec §3). Finite and small: bounded by the eviction
/// policy, typically holding at most a handful of entries at once.
pub struct JobRegistry<T> {
    policy: EvictionPolicy,
    jobs: HashMap<String, Arc<Job<T>>>,
    /// Generations in insertion order, oldest first. Each generation is the set of jobIds
    /// minted for one chain tip; `begin_generation` starts a new one, `insert` adds to the
    /// current one.
    generations: VecDeque<Vec<String>>,
}

impl<T> JobRegistry<T> {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            jobs: HashMap::new(),
            generations: VecDeque::new(),
        }
    }

    /// Start a new tip generation, applying the eviction policy to whatever came before.
    pub fn begin_generation(&mut self) {
        match self.policy {
            EvictionPolicy::ClearOnNewTip => {
                self.jobs.clear();
                self.generations.clear();
            }
            EvictionPolicy::SlidingWindow { depth } => {
                while self.generations.len() >= depth {
                    if let Some(evicted) = self.generations.pop_front() {
                        for job_id in evicted {
                            self.jobs.remove(&job_id);
                        }
                    } else {
                        break;
                    }
                }
            }
        }
        self.generations.push_back(Vec::new());
    }

    /// Insert a job into the current generation (call [`begin_generation`](Self::begin_generation)
    /// first for a new tip; omit it to add another job to the same tip, e.g. a forced
    /// rebroadcast).
    pub fn insert(&mut self, job: Job<T>) -> Arc<Job<T>> {
        if self.generations.is_empty() {
            self.generations.push_back(Vec::new());
        }
        let job_id = job.job_id.clone();
        let job = Arc::new(job);
        self.jobs.insert(job_id.clone(), job.clone());
        self.generations
            .back_mut()
            .expect("generation just ensured non-empty")
            .push(job_id);
        job
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<Job<T>>> {
        self.jobs.get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// The most recently inserted job, if any (the job a fresh connection should be handed).
    pub fn current(&self) -> Option<Arc<Job<T>>> {
        let job_id = self.generations.back()?.last()?;
        self.jobs.get(job_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_generator_yields_distinct_strings() {
        let gen = JobIdGenerator::new();
        let ids: HashSet<String> = (0..1000).map(|_| gen.next()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn duplicate_share_detected_on_second_submission() {
        let job = Job::new("1".into(), (), serde_json::json!({}));
        let key = ("e1".to_string(), "e2".to_string(), 1u32, 2u32);
        assert!(!job.register_share(key.clone()));
        assert!(job.register_share(key));
    }

    #[test]
    fn clear_on_new_tip_evicts_prior_generation() {
        let mut registry: JobRegistry<()> = JobRegistry::new(EvictionPolicy::ClearOnNewTip);
        registry.begin_generation();
        registry.insert(Job::new("1".into(), (), serde_json::json!({})));
        assert_eq!(registry.len(), 1);

        registry.begin_generation();
        registry.insert(Job::new("2".into(), (), serde_json::json!({})));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("1").is_none());
        assert!(registry.get("2").is_some());
    }

    #[test]
    fn sliding_window_retains_depth_generations() {
        let mut registry: JobRegistry<()> =
            JobRegistry::new(EvictionPolicy::SlidingWindow { depth: 3 });

        for i in 1..=4 {
            registry.begin_generation();
            registry.insert(Job::new(i.to_string(), (), serde_json::json!({})));
        }

        assert_eq!(registry.len(), 3);
        assert!(registry.get("1").is_none());
        assert!(registry.get("4").is_some());
    }

    #[test]
    fn same_generation_insert_keeps_both_jobs() {
        let mut registry: JobRegistry<()> = JobRegistry::new(EvictionPolicy::ClearOnNewTip);
        registry.begin_generation();
        registry.insert(Job::new("1".into(), (), serde_json::json!({})));
        registry.insert(Job::new("1-rebroadcast".into(), (), serde_json::json!({})));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.current().unwrap().job_id, "1-rebroadcast");
    }
}
