//! In-process tokio job runner: the reference host behind `domain::ports::Scheduler`
//! (§6 SI). Owns per-signal mutual exclusion (a striped lock keyed by `signal_id`)
//! and a heartbeat watchdog that flags periodic jobs that stop ticking.
//!
//! Job bodies are registered once during wiring (`register_once`/`register_periodic`,
//! inherent methods, not part of the trait) and invoked by name through the
//! trait's `schedule_once`/`schedule_periodic`. This keeps the domain-facing
//! contract (what the core may ask of its host) separate from the host's own
//! bootstrap API (how the binary wires job bodies to names).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::ports::Scheduler;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type OnceHandler = Arc<dyn Fn(Uuid) -> BoxFuture + Send + Sync>;
type PeriodicHandler = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

/// Number of stripes in the per-signal exclusion lock. Bounded regardless of
/// how many distinct signals are ever seen, unlike a growing `HashMap<Uuid, Mutex>`.
const LOCK_STRIPES: usize = 64;

/// How far behind a periodic job's last heartbeat may fall (relative to its
/// own declared interval) before the watchdog logs it as stalled.
const WATCHDOG_STALL_FACTOR: u32 = 3;

pub struct TokioScheduler {
    locks: Arc<Vec<Mutex<()>>>,
    once_handlers: Arc<RwLock<HashMap<String, OnceHandler>>>,
    periodic_handlers: Arc<RwLock<HashMap<String, PeriodicHandler>>>,
    heartbeats: Arc<RwLock<HashMap<String, (Instant, Duration)>>>,
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        let mut locks = Vec::with_capacity(LOCK_STRIPES);
        for _ in 0..LOCK_STRIPES {
            locks.push(Mutex::new(()));
        }
        Self {
            locks: Arc::new(locks),
            once_handlers: Arc::new(RwLock::new(HashMap::new())),
            periodic_handlers: Arc::new(RwLock::new(HashMap::new())),
            heartbeats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn stripe_for(&self, signal_id: Uuid) -> usize {
        (signal_id.as_u128() % LOCK_STRIPES as u128) as usize
    }

    /// Registers the body run by `schedule_once(job_name, _)`. `handler` must
    /// tolerate being invoked more than once for the same `signal_id`
    /// (at-least-once delivery, §6 SI).
    pub async fn register_once<F, Fut>(&self, job_name: &str, handler: F)
    where
        F: Fn(Uuid) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: OnceHandler = Arc::new(move |id| Box::pin(handler(id)));
        self.once_handlers.write().await.insert(job_name.to_string(), boxed);
    }

    /// Registers `handler` to be run every `every` once `schedule_periodic`
    /// is called for the same `job_name`.
    pub async fn register_periodic<F, Fut>(&self, job_name: &str, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: PeriodicHandler = Arc::new(move || Box::pin(handler()));
        self.periodic_handlers.write().await.insert(job_name.to_string(), boxed);
    }

    /// Spawns a task that checks every minute whether any periodic job's
    /// heartbeat has fallen behind its own interval by `WATCHDOG_STALL_FACTOR`,
    /// logging (not restarting) the stall -- a stalled job means its task
    /// panicked or is wedged inside a single tick, which a fresh spawn would
    /// likely repeat.
    pub fn spawn_watchdog(self: &Arc<Self>) {
        let heartbeats = self.heartbeats.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let snapshot = heartbeats.read().await;
                for (job_name, (last_seen, interval)) in snapshot.iter() {
                    let stall_threshold = *interval * WATCHDOG_STALL_FACTOR;
                    if last_seen.elapsed() > stall_threshold {
                        error!(
                            job_name,
                            elapsed_secs = last_seen.elapsed().as_secs(),
                            interval_secs = interval.as_secs(),
                            "watchdog: periodic job heartbeat is stale"
                        );
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule_once(&self, job_name: &str, signal_id: Uuid) {
        let handler = self.once_handlers.read().await.get(job_name).cloned();
        let Some(handler) = handler else {
            warn!(job_name, "schedule_once: no handler registered, dropping");
            return;
        };

        let locks = self.locks.clone();
        let idx = self.stripe_for(signal_id);

        tokio::spawn(async move {
            let _guard = locks[idx].lock().await;
            handler(signal_id).await;
        });
    }

    async fn schedule_periodic(&self, job_name: &str, every: Duration) {
        let handler = self.periodic_handlers.read().await.get(job_name).cloned();
        let Some(handler) = handler else {
            warn!(job_name, "schedule_periodic: no handler registered, dropping");
            return;
        };

        let heartbeats = self.heartbeats.clone();
        let job_name_owned = job_name.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                handler().await;
                heartbeats
                    .write()
                    .await
                    .insert(job_name_owned.clone(), (Instant::now(), every));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn schedule_once_invokes_registered_handler() {
        let scheduler = TokioScheduler::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        scheduler
            .register_once("test-job", move |_id| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        scheduler.schedule_once("test-job", Uuid::new_v4()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schedule_once_without_handler_does_not_panic() {
        let scheduler = TokioScheduler::new();
        scheduler.schedule_once("missing-job", Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn same_signal_jobs_serialize_through_stripe_lock() {
        let scheduler = Arc::new(TokioScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        scheduler
            .register_once("slow-job", move |_id| {
                let order = order_a.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    order.lock().await.push("first");
                }
            })
            .await;

        let signal_id = Uuid::new_v4();
        scheduler.schedule_once("slow-job", signal_id).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Same stripe (same uuid) should still only run the one queued task.
        scheduler.schedule_once("slow-job", signal_id).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(order.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn schedule_periodic_ticks_and_updates_heartbeat() {
        let scheduler = TokioScheduler::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        scheduler
            .register_periodic("heartbeat-job", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        scheduler
            .schedule_periodic("heartbeat-job", Duration::from_millis(20))
            .await;
        tokio::time::sleep(Duration::from_millis(90)).await;

        assert!(calls.load(Ordering::SeqCst) >= 2);
    }
}
