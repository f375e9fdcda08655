// src/registry.rs
//! Live sessions keyed by page identity: one per (student, task).

use crate::channel::ChannelFactory;
use crate::errors::{Result, RunnerError};
use crate::session::{DraftSink, Session, SessionConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub type SharedSession = Arc<AsyncMutex<Session>>;

struct Entry {
    session: SharedSession,
    last_used: Instant,
}

pub struct SessionRegistry {
    factory: Arc<dyn ChannelFactory>,
    config: SessionConfig,
    idle_ttl: Duration,
    sessions: Mutex<HashMap<String, Entry>>,
    /// Last pasted snippet per page. Kept outside the session so recording a
    /// paste never waits on a running attempt.
    pastes: Mutex<HashMap<String, String>>,
}

fn session_key(student: &str, task_id: i64) -> String {
    format!("{}:{}", task_id, student)
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn ChannelFactory>, config: SessionConfig, idle_ttl: Duration) -> Self {
        Self {
            factory,
            config,
            idle_ttl,
            sessions: Mutex::new(HashMap::new()),
            pastes: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the page's session, creating it (and warming its interpreter)
    /// on first use.
    pub fn get_or_create(&self, student: &str, task_id: i64, drafts: Arc<dyn DraftSink>) -> SharedSession {
        let mut sessions = locked(&self.sessions);
        let entry = sessions.entry(session_key(student, task_id)).or_insert_with(|| {
            log::info!("Opening execution session for '{}' on task {}", student, task_id);
            let session = Session::new(Arc::clone(&self.factory), self.config.clone()).with_drafts(drafts);
            Entry {
                session: Arc::new(AsyncMutex::new(session)),
                last_used: Instant::now(),
            }
        });
        entry.last_used = Instant::now();
        Arc::clone(&entry.session)
    }

    /// Claims the session for one attempt. A session already mid-attempt
    /// rejects the second request instead of queueing it.
    pub fn acquire(
        &self,
        student: &str,
        task_id: i64,
        drafts: Arc<dyn DraftSink>,
    ) -> Result<OwnedMutexGuard<Session>> {
        self.get_or_create(student, task_id, drafts)
            .try_lock_owned()
            .map_err(|_| RunnerError::SessionBusy)
    }

    /// Remembers a pasted snippet for the copy check of the next test run.
    pub fn record_paste(&self, student: &str, task_id: i64, text: &str) {
        locked(&self.pastes).insert(session_key(student, task_id), text.to_string());
    }

    pub fn last_paste(&self, student: &str, task_id: i64) -> Option<String> {
        locked(&self.pastes).get(&session_key(student, task_id)).cloned()
    }

    pub fn len(&self) -> usize {
        locked(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes sessions nobody has touched for the idle TTL and stops their
    /// interpreters. Sessions with an attempt in flight are kept.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle: Vec<(String, OwnedMutexGuard<Session>)> = {
            let mut sessions = locked(&self.sessions);
            let expired: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.last_used) >= self.idle_ttl)
                .map(|(key, _)| key.clone())
                .collect();
            let mut idle = Vec::with_capacity(expired.len());
            for key in expired {
                let claimed = sessions
                    .get(&key)
                    .and_then(|entry| Arc::clone(&entry.session).try_lock_owned().ok());
                if let Some(guard) = claimed {
                    sessions.remove(&key);
                    idle.push((key, guard));
                }
            }
            idle
        };
        if idle.is_empty() {
            return 0;
        }

        {
            let mut pastes = locked(&self.pastes);
            for (key, _) in &idle {
                pastes.remove(key);
            }
        }
        log::info!("Closing {} idle execution session(s)", idle.len());
        futures::future::join_all(idle.iter().map(|(_, session)| session.shutdown())).await;
        idle.len()
    }

    /// Runs `evict_idle` every `every` until `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticks.tick() => {
                        self.evict_idle().await;
                    }
                }
            }
        })
    }

    /// Terminates every session's channel.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<SharedSession> = {
            let mut sessions = locked(&self.sessions);
            sessions.drain().map(|(_, entry)| entry.session).collect()
        };
        locked(&self.pastes).clear();
        log::info!("Shutting down {} execution session(s)", sessions.len());
        futures::future::join_all(sessions.iter().map(|session| async move {
            session.lock().await.shutdown().await;
        }))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use crate::testing::{ScriptedFactory, completed};
    use async_trait::async_trait;

    const IDLE: Duration = Duration::from_secs(60);

    struct NoDrafts;

    #[async_trait]
    impl DraftSink for NoDrafts {
        async fn save_draft(&self, _source: &str) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> (SessionRegistry, Arc<ScriptedFactory>) {
        let factory = ScriptedFactory::new(|_| completed("ok\n"));
        (SessionRegistry::new(factory.clone(), SessionConfig::default(), IDLE), factory)
    }

    #[tokio::test]
    async fn test_sessions_are_per_student_and_task() {
        let (registry, factory) = registry();
        let a = registry.get_or_create("ann", 1, Arc::new(NoDrafts));
        let again = registry.get_or_create("ann", 1, Arc::new(NoDrafts));
        let other_task = registry.get_or_create("ann", 2, Arc::new(NoDrafts));
        let other_student = registry.get_or_create("bob", 1, Arc::new(NoDrafts));

        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &other_task));
        assert!(!Arc::ptr_eq(&a, &other_student));
        assert_eq!(registry.len(), 3);
        assert_eq!(factory.created(), 3);
    }

    #[tokio::test]
    async fn test_second_attempt_is_rejected_while_first_holds_session() {
        let (registry, _) = registry();
        let held = registry.acquire("ann", 1, Arc::new(NoDrafts)).unwrap();
        assert!(matches!(
            registry.acquire("ann", 1, Arc::new(NoDrafts)),
            Err(RunnerError::SessionBusy)
        ));
        drop(held);
        assert!(registry.acquire("ann", 1, Arc::new(NoDrafts)).is_ok());
    }

    #[tokio::test]
    async fn test_paste_is_recorded_while_attempt_holds_session() {
        let (registry, _) = registry();
        let _running = registry.acquire("ann", 1, Arc::new(NoDrafts)).unwrap();

        registry.record_paste("ann", 1, "print('copied text')");

        assert_eq!(registry.last_paste("ann", 1).as_deref(), Some("print('copied text')"));
        assert_eq!(registry.last_paste("ann", 2), None);
        assert_eq!(registry.last_paste("bob", 1), None);
    }

    #[tokio::test]
    async fn test_shutdown_clears_sessions_and_pastes() {
        let (registry, _) = registry();
        registry.get_or_create("ann", 1, Arc::new(NoDrafts));
        registry.record_paste("ann", 1, "print('copied text')");

        registry.shutdown_all().await;
        assert!(registry.is_empty());
        assert_eq!(registry.last_paste("ann", 1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_evicted_and_its_channel_stopped() {
        let (registry, factory) = registry();
        let idle = registry.get_or_create("ann", 1, Arc::new(NoDrafts));
        registry.get_or_create("bob", 1, Arc::new(NoDrafts));
        idle.lock().await.wait_until_ready().await.unwrap();
        registry.record_paste("ann", 1, "print('copied text')");

        tokio::time::advance(IDLE / 2).await;
        registry.get_or_create("bob", 1, Arc::new(NoDrafts));
        tokio::time::advance(IDLE / 2).await;

        assert_eq!(registry.evict_idle().await, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(idle.lock().await.channel_state(), ChannelState::Uninitialized);
        assert!(factory.channel(0).terminated());
        assert!(!factory.channel(1).terminated());
        assert_eq!(registry.last_paste("ann", 1), None);

        // Coming back opens a fresh session.
        let reopened = registry.get_or_create("ann", 1, Arc::new(NoDrafts));
        assert!(!Arc::ptr_eq(&idle, &reopened));
        assert_eq!(factory.created(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_mid_attempt_is_not_evicted() {
        let (registry, factory) = registry();
        let running = registry.acquire("ann", 1, Arc::new(NoDrafts)).unwrap();

        tokio::time::advance(IDLE * 2).await;
        assert_eq!(registry.evict_idle().await, 0);
        assert_eq!(registry.len(), 1);
        assert!(!factory.channel(0).terminated());

        drop(running);
        assert_eq!(registry.evict_idle().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_until_cancelled() {
        let (registry, factory) = registry();
        let registry = Arc::new(registry);
        registry.get_or_create("ann", 1, Arc::new(NoDrafts));

        let stop = CancellationToken::new();
        let sweeper = Arc::clone(&registry).spawn_sweeper(Duration::from_secs(10), stop.clone());

        tokio::time::sleep(IDLE + Duration::from_secs(11)).await;
        assert!(registry.is_empty());
        assert!(factory.channel(0).terminated());

        stop.cancel();
        sweeper.await.unwrap();
    }
}
