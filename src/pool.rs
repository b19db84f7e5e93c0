//! Rotating proxy pool shared by all download workers.
//!
//! The pool hands out at most one proxy per worker identity. Workers that
//! finish a part cleanly `release` their proxy back to the head of the queue
//! so the next assignment reuses a known-good endpoint; workers whose proxy
//! misbehaved `fail` it to the tail and immediately receive a different one.
//! Queue, assignment map and error counter are guarded by a single mutex so
//! a proxy can never be observed in both places at once.
use std::collections::{HashMap, VecDeque};

use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// The queue is empty and the requesting worker holds no proxy.
    #[error("no proxies available")]
    NoProxiesAvailable,
    /// `release` was called for a worker that holds nothing.
    #[error("no proxy assigned to worker")]
    NoAssignment,
}

struct PoolInner {
    /// Available proxies in FIFO order.
    queue: VecDeque<String>,
    /// Worker identity -> proxy currently granted to it.
    assigned: HashMap<String, String>,
    error_count: u64,
}

pub struct ProxyPool {
    inner: Mutex<PoolInner>,
}

impl ProxyPool {
    /// Builds a pool from the given proxy list. The initial queue order is
    /// randomized so repeated runs do not hammer the same endpoints first.
    pub fn new(proxies: &[String]) -> Self {
        let mut queue: Vec<String> = proxies.to_vec();
        queue.shuffle(&mut rand::thread_rng());

        Self {
            inner: Mutex::new(PoolInner {
                queue: queue.into(),
                assigned: HashMap::new(),
                error_count: 0,
            }),
        }
    }

    /// Returns the proxy assigned to `worker`, granting the head of the
    /// queue if the worker holds nothing yet.
    pub async fn assign(&self, worker: &str) -> Result<String, PoolError> {
        let mut inner = self.inner.lock().await;

        if let Some(proxy) = inner.assigned.get(worker) {
            return Ok(proxy.clone());
        }

        inner.assign_next(worker)
    }

    /// Reports that the worker's current proxy is suspected bad: the proxy
    /// is requeued at the tail, the error counter bumped, and a fresh
    /// assignment is made. A worker holding nothing just gets an assignment.
    pub async fn fail(&self, worker: &str) -> Result<String, PoolError> {
        let mut inner = self.inner.lock().await;

        if let Some(proxy) = inner.assigned.remove(worker) {
            inner.error_count += 1;
            inner.queue.push_back(proxy);
        }

        inner.assign_next(worker)
    }

    /// Hands the worker's proxy back to the head of the queue so the next
    /// assignment reuses it. Never counts as an error.
    pub async fn release(&self, worker: &str) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().await;

        let proxy = inner
            .assigned
            .remove(worker)
            .ok_or(PoolError::NoAssignment)?;
        inner.queue.push_front(proxy);
        Ok(())
    }

    /// Total number of `fail` calls that actually penalised a proxy.
    pub async fn error_count(&self) -> u64 {
        self.inner.lock().await.error_count
    }
}

impl PoolInner {
    fn assign_next(&mut self, worker: &str) -> Result<String, PoolError> {
        let proxy = self.queue.pop_front().ok_or(PoolError::NoProxiesAvailable)?;
        self.assigned.insert(worker.to_string(), proxy.clone());
        tracing::debug!(target: "proxy", worker, address = %proxy, "proxy assigned to worker");
        Ok(proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxies(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://proxy{}:8080", i)).collect()
    }

    #[tokio::test]
    async fn assign_is_idempotent_per_worker() {
        let pool = ProxyPool::new(&proxies(3));
        let first = pool.assign("0").await.unwrap();
        let second = pool.assign("0").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn assign_and_release_reuse_the_same_endpoint() {
        let pool = ProxyPool::new(&proxies(5));
        let first = pool.assign("0").await.unwrap();
        pool.release("0").await.unwrap();

        for _ in 0..10 {
            let again = pool.assign("0").await.unwrap();
            assert_eq!(first, again);
            pool.release("0").await.unwrap();
        }
    }

    #[tokio::test]
    async fn fail_hands_out_a_different_proxy() {
        let pool = ProxyPool::new(&proxies(2));
        let first = pool.assign("0").await.unwrap();
        let second = pool.fail("0").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.error_count().await, 1);

        // The failed proxy went to the tail; a second worker gets it last.
        let other = pool.assign("1").await.unwrap();
        assert_eq!(other, first);
    }

    #[tokio::test]
    async fn fail_with_single_proxy_reassigns_it() {
        let pool = ProxyPool::new(&proxies(1));
        let first = pool.assign("0").await.unwrap();
        let second = pool.fail("0").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.error_count().await, 1);
    }

    #[tokio::test]
    async fn fail_without_assignment_behaves_as_assign() {
        let pool = ProxyPool::new(&proxies(2));
        let proxy = pool.fail("0").await.unwrap();
        assert!(!proxy.is_empty());
        // No proxy was penalised.
        assert_eq!(pool.error_count().await, 0);
    }

    #[tokio::test]
    async fn release_without_assignment_errors() {
        let pool = ProxyPool::new(&proxies(2));
        assert_eq!(pool.release("0").await, Err(PoolError::NoAssignment));
    }

    #[tokio::test]
    async fn empty_pool_cannot_assign() {
        let pool = ProxyPool::new(&[]);
        assert_eq!(pool.assign("0").await, Err(PoolError::NoProxiesAvailable));
        assert_eq!(pool.fail("0").await, Err(PoolError::NoProxiesAvailable));
    }

    #[tokio::test]
    async fn exhausted_queue_fails_new_workers_only() {
        let pool = ProxyPool::new(&proxies(2));
        pool.assign("0").await.unwrap();
        pool.assign("1").await.unwrap();

        // Every proxy is held; a third worker cannot be served.
        assert_eq!(pool.assign("2").await, Err(PoolError::NoProxiesAvailable));
        // Holders are unaffected.
        assert!(pool.assign("0").await.is_ok());
    }

    #[tokio::test]
    async fn queue_and_assignments_conserve_the_proxy_set() {
        let initial = proxies(4);
        let pool = ProxyPool::new(&initial);

        pool.assign("0").await.unwrap();
        pool.assign("1").await.unwrap();
        pool.fail("0").await.unwrap();
        pool.release("1").await.unwrap();

        let inner = pool.inner.lock().await;
        assert_eq!(inner.queue.len() + inner.assigned.len(), initial.len());

        let mut seen: Vec<String> = inner
            .queue
            .iter()
            .cloned()
            .chain(inner.assigned.values().cloned())
            .collect();
        seen.sort();
        let mut expected = initial.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn no_proxy_is_held_by_two_workers() {
        let pool = ProxyPool::new(&proxies(3));
        let a = pool.assign("a").await.unwrap();
        let b = pool.assign("b").await.unwrap();
        let c = pool.assign("c").await.unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
