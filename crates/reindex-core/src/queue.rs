//! Job queue seam for distributing pages across worker lanes and processes.
//!
//! A job moves `pending → active → (done | failed)`. Workers [`claim`](JobQueue::claim)
//! one job at a time and must [`complete`](JobQueue::complete) it before claiming
//! the next. Completion is detected by [`outstanding`](JobQueue::outstanding)
//! (pending + active) reaching zero. A claim held longer than its lease is
//! presumed lost with its worker and goes back to `pending` through
//! [`requeue_expired`](JobQueue::requeue_expired).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::adapter::EntityType;
use crate::error::QueueError;
use crate::transaction::TransactionKey;

/// Topic carrying page jobs of a partitioned reindex.
pub fn page_topic(entity: EntityType) -> String {
    format!("{entity}:pages")
}

/// Topic carrying SKU refresh jobs.
pub fn refresh_topic(entity: EntityType) -> String {
    format!("{entity}:refresh")
}

/// Work item as stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub entity_type: EntityType,
    #[serde(flatten)]
    pub payload: JobPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// One page of a partitioned reindex. The key is fixed when the run is planned.
    Page {
        page: u32,
        page_size: u32,
        updated_after: Option<DateTime<Utc>>,
        transaction_key: TransactionKey,
    },
    /// Re-fetch a set of records by SKU
    Refresh {
        skus: Vec<String>,
        adapter: Option<String>,
    },
}

impl Job {
    pub fn page(
        entity: EntityType,
        transaction_key: TransactionKey,
        page: u32,
        page_size: u32,
        updated_after: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: format!("{entity}-{transaction_key}-{page}"),
            entity_type: entity,
            payload: JobPayload::Page {
                page,
                page_size,
                updated_after,
                transaction_key,
            },
        }
    }

    pub fn refresh(entity: EntityType, skus: Vec<String>, adapter: Option<String>) -> Self {
        Self {
            id: format!("{entity}-refresh-{}", TransactionKey::mint()),
            entity_type: entity,
            payload: JobPayload::Refresh { skus, adapter },
        }
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, QueueError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A job handed to one worker. `receipt` identifies it to the backend on completion.
#[derive(Debug, Clone)]
pub struct Claim {
    pub job: Job,
    pub receipt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, topic: &str, job: &Job) -> Result<(), QueueError>;

    /// Take the next pending job, if any. Never blocks waiting for work.
    async fn claim(&self, topic: &str) -> Result<Option<Claim>, QueueError>;

    async fn complete(
        &self,
        topic: &str,
        claim: &Claim,
        outcome: JobOutcome,
    ) -> Result<(), QueueError>;

    /// Pending plus active jobs of `topic`.
    async fn outstanding(&self, topic: &str) -> Result<u64, QueueError>;

    /// Move jobs claimed more than `lease` ago back to the head of `pending`.
    ///
    /// Returns the number of jobs requeued.
    async fn requeue_expired(&self, topic: &str, lease: Duration) -> Result<u64, QueueError>;
}

/// Failed jobs kept per topic
const FAILED_KEEP: usize = 1000;

#[derive(Debug, Default)]
struct TopicState {
    pending: VecDeque<Job>,
    /// Claimed jobs by receipt, with their claim time
    active: HashMap<String, (Job, Instant)>,
    completed: u64,
    failed: VecDeque<(Job, String)>,
}

/// Single-process queue. Jobs live as long as the queue does.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    topics: Mutex<HashMap<String, TopicState>>,
    next_receipt: AtomicU64,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_topic<T>(&self, topic: &str, f: impl FnOnce(&mut TopicState) -> T) -> T {
        let mut topics = self.topics.lock().expect("queue lock poisoned");
        f(topics.entry(topic.to_string()).or_default())
    }

    /// Jobs completed successfully on `topic`
    pub fn completed(&self, topic: &str) -> u64 {
        self.with_topic(topic, |t| t.completed)
    }

    /// The most recent failed jobs of `topic` with their reasons, oldest first
    pub fn failed(&self, topic: &str) -> Vec<(Job, String)> {
        self.with_topic(topic, |t| t.failed.iter().cloned().collect())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, topic: &str, job: &Job) -> Result<(), QueueError> {
        self.with_topic(topic, |t| t.pending.push_back(job.clone()));
        Ok(())
    }

    async fn claim(&self, topic: &str) -> Result<Option<Claim>, QueueError> {
        let receipt = self.next_receipt.fetch_add(1, Ordering::Relaxed).to_string();
        Ok(self.with_topic(topic, |t| {
            let job = t.pending.pop_front()?;
            t.active
                .insert(receipt.clone(), (job.clone(), Instant::now()));
            Some(Claim { job, receipt })
        }))
    }

    async fn complete(
        &self,
        topic: &str,
        claim: &Claim,
        outcome: JobOutcome,
    ) -> Result<(), QueueError> {
        self.with_topic(topic, |t| {
            let Some((job, _)) = t.active.remove(&claim.receipt) else {
                return Err(QueueError::Backend(format!(
                    "job {} is not active on {topic}",
                    claim.job.id
                )));
            };
            match outcome {
                JobOutcome::Completed => t.completed += 1,
                JobOutcome::Failed(reason) => {
                    if t.failed.len() == FAILED_KEEP {
                        t.failed.pop_front();
                    }
                    t.failed.push_back((job, reason));
                }
            }
            Ok(())
        })
    }

    async fn outstanding(&self, topic: &str) -> Result<u64, QueueError> {
        Ok(self.with_topic(topic, |t| (t.pending.len() + t.active.len()) as u64))
    }

    async fn requeue_expired(&self, topic: &str, lease: Duration) -> Result<u64, QueueError> {
        Ok(self.with_topic(topic, |t| {
            let expired: Vec<String> = t
                .active
                .iter()
                .filter(|(_, (_, claimed_at))| claimed_at.elapsed() >= lease)
                .map(|(receipt, _)| receipt.clone())
                .collect();
            for receipt in &expired {
                if let Some((job, _)) = t.active.remove(receipt) {
                    log::warn!("{topic}: claim on job {} expired, requeueing", job.id);
                    t.pending.push_front(job);
                }
            }
            expired.len() as u64
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TransactionKey {
        TransactionKey::new(1_700_000_000_000).unwrap()
    }

    #[test]
    fn page_job_encodes_key_and_kind() {
        let job = Job::page(EntityType::Course, key(), 2, 50, None);
        let raw = job.encode().unwrap();
        assert!(raw.contains("\"kind\":\"page\""));
        assert!(raw.contains("\"transaction_key\":1700000000000"));
        assert_eq!(Job::decode(&raw).unwrap(), job);
    }

    #[test]
    fn decode_rejects_zero_key() {
        let raw = r#"{"id":"x","entity_type":"course","kind":"page","page":1,"page_size":50,"updated_after":null,"transaction_key":0}"#;
        assert!(matches!(Job::decode(raw), Err(QueueError::Codec(_))));
    }

    #[test]
    fn topics_are_per_entity() {
        assert_eq!(page_topic(EntityType::Course), "course:pages");
        assert_eq!(refresh_topic(EntityType::Course), "course:refresh");
    }

    #[tokio::test]
    async fn claim_is_fifo_and_tracks_outstanding() {
        let q = MemoryJobQueue::new();
        let topic = "course:pages";
        for page in 1..=3 {
            q.enqueue(topic, &Job::page(EntityType::Course, key(), page, 50, None))
                .await
                .unwrap();
        }
        assert_eq!(q.outstanding(topic).await.unwrap(), 3);

        let first = q.claim(topic).await.unwrap().unwrap();
        assert_eq!(first.job.id, format!("course-{}-1", key()));
        // claimed but not completed still counts
        assert_eq!(q.outstanding(topic).await.unwrap(), 3);

        q.complete(topic, &first, JobOutcome::Completed)
            .await
            .unwrap();
        assert_eq!(q.outstanding(topic).await.unwrap(), 2);
        assert_eq!(q.completed(topic), 1);
    }

    #[tokio::test]
    async fn failed_jobs_leave_outstanding() {
        let q = MemoryJobQueue::new();
        let topic = "t";
        q.enqueue(topic, &Job::page(EntityType::Course, key(), 1, 50, None))
            .await
            .unwrap();
        let claim = q.claim(topic).await.unwrap().unwrap();
        q.complete(topic, &claim, JobOutcome::Failed("boom".into()))
            .await
            .unwrap();
        assert_eq!(q.outstanding(topic).await.unwrap(), 0);
        assert_eq!(q.failed(topic)[0].1, "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_claim_goes_back_to_the_head() {
        let q = MemoryJobQueue::new();
        let topic = "course:pages";
        for page in 1..=2 {
            q.enqueue(topic, &Job::page(EntityType::Course, key(), page, 50, None))
                .await
                .unwrap();
        }
        let lost = q.claim(topic).await.unwrap().unwrap();
        let lease = Duration::from_secs(60);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(q.requeue_expired(topic, lease).await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(q.requeue_expired(topic, lease).await.unwrap(), 1);
        assert_eq!(q.outstanding(topic).await.unwrap(), 2);

        let again = q.claim(topic).await.unwrap().unwrap();
        assert_eq!(again.job, lost.job);
        // the lost worker's receipt is no longer valid
        assert!(q.complete(topic, &lost, JobOutcome::Completed).await.is_err());
        q.complete(topic, &again, JobOutcome::Completed).await.unwrap();
        assert_eq!(q.outstanding(topic).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_list_is_bounded() {
        let q = MemoryJobQueue::new();
        let topic = "t";
        for page in 1..=(FAILED_KEEP as u32 + 5) {
            q.enqueue(topic, &Job::page(EntityType::Course, key(), page, 50, None))
                .await
                .unwrap();
            let claim = q.claim(topic).await.unwrap().unwrap();
            q.complete(topic, &claim, JobOutcome::Failed("boom".into()))
                .await
                .unwrap();
        }
        let failed = q.failed(topic);
        assert_eq!(failed.len(), FAILED_KEEP);
        assert_eq!(failed[0].0.id, format!("course-{}-6", key()));
    }

    #[tokio::test]
    async fn empty_queue() {
        let q = MemoryJobQueue::new();
        assert!(q.claim("none").await.unwrap().is_none());
        assert_eq!(q.outstanding("none").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn completing_twice_is_an_error() {
        let q = MemoryJobQueue::new();
        q.enqueue("t", &Job::refresh(EntityType::Course, vec!["a".into()], None))
            .await
            .unwrap();
        let claim = q.claim("t").await.unwrap().unwrap();
        q.complete("t", &claim, JobOutcome::Completed).await.unwrap();
        assert!(q.complete("t", &claim, JobOutcome::Completed).await.is_err());
    }
}
