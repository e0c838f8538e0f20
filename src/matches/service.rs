use crate::clock::Clock;
use crate::error::PvpError;
use crate::quiz::QuestionSetGenerator;
use crate::store::directory::Relationships;
use crate::store::DocumentStore;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct MatchSettings {
    pub async_match_ttl: Duration,
    pub challenge_ttl: Duration,
    pub default_topics: Vec<String>,
}

impl Default for MatchSettings {
    fn default() -> Self {
        MatchSettings {
            async_match_ttl: Duration::hours(48),
            challenge_ttl: Duration::hours(48),
            default_topics: Vec::new(),
        }
    }
}

impl MatchSettings {
    pub fn challenge_deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, PvpError> {
        deadline(now, self.challenge_ttl, "challenge ttl")
    }

    pub fn async_match_deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, PvpError> {
        deadline(now, self.async_match_ttl, "async match ttl")
    }
}

fn deadline(now: DateTime<Utc>, ttl: Duration, what: &str) -> Result<DateTime<Utc>, PvpError> {
    now.checked_add_signed(ttl).ok_or_else(|| {
        PvpError::Misconfigured(format!("{} of {} pushes the deadline out of range", what, ttl))
    })
}

/// Entry point for every match operation. Sync, async and challenge flows
/// live in their own modules as `impl PvpService` blocks.
pub struct PvpService {
    pub(crate) store: Arc<DocumentStore>,
    pub(crate) generator: QuestionSetGenerator,
    pub(crate) relationships: Arc<dyn Relationships>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: MatchSettings,
    generation_guards: GuardMap,
}

impl PvpService {
    pub fn new(
        store: Arc<DocumentStore>,
        generator: QuestionSetGenerator,
        relationships: Arc<dyn Relationships>,
        clock: Arc<dyn Clock>,
        settings: MatchSettings,
    ) -> Self {
        PvpService {
            store,
            generator,
            relationships,
            clock,
            settings,
            generation_guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Serialises question generation per key so racing starts call the provider once.
    ///
    /// Holders must re-read the record after locking and skip generation if
    /// someone else already persisted a set. The map entry goes away when the
    /// last guard for `key` is dropped, including when the request is cancelled.
    pub(crate) fn generation_guard(&self, key: Uuid) -> GenerationGuard<'_> {
        let mut guards = self
            .generation_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = guards
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        GenerationGuard {
            guards: &self.generation_guards,
            key,
            lock,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_generation_guards(&self) -> usize {
        self.generation_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

type GuardMap = Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>;

pub(crate) struct GenerationGuard<'a> {
    guards: &'a GuardMap,
    key: Uuid,
    lock: Arc<AsyncMutex<()>>,
}

impl GenerationGuard<'_> {
    pub(crate) async fn lock(&self) -> AsyncMutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);

        // One reference in the map, one held here: nobody else is waiting.
        let idle = Arc::strong_count(&self.lock) <= 2;
        if idle && guards.get(&self.key).is_some_and(|x| Arc::ptr_eq(x, &self.lock)) {
            guards.remove(&self.key);
        }
    }
}
