use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use lunchbox_types::error::{Result, RoundError};
use lunchbox_types::models::Round;

use crate::Database;

/// Arena of live rounds keyed by round id, written through to SQLite.
///
/// Each round has its own mutation lock, so writers on different rounds
/// never wait for each other. Readers never take that lock: they clone the
/// `Arc` of the last committed snapshot, so they observe either the state
/// before or after an in-flight mutation, never a mix.
#[derive(Clone)]
pub struct RoundRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    db: Arc<Database>,
    rounds: RwLock<HashMap<Uuid, Arc<RoundSlot>>>,
}

struct RoundSlot {
    current: RwLock<Arc<Round>>,
    write_lock: Arc<Mutex<()>>,
    removed: AtomicBool,
}

impl RoundSlot {
    fn new(round: Round) -> Self {
        Self {
            current: RwLock::new(Arc::new(round)),
            write_lock: Arc::new(Mutex::new(())),
            removed: AtomicBool::new(false),
        }
    }

    // Snapshots are swapped whole, so a poisoned lock still guards a
    // consistent round.
    fn snapshot(&self) -> Arc<Round> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, round: Arc<Round>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = round;
    }
}

impl RoundRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                db,
                rounds: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Restore every stored round into a fresh registry.
    pub fn load(db: Arc<Database>) -> anyhow::Result<Self> {
        let rounds = db.load_rounds()?;
        let registry = Self::new(db);
        {
            let mut map = registry.inner.write_map();
            for round in rounds {
                map.insert(round.id, Arc::new(RoundSlot::new(round)));
            }
            info!("Restored {} rounds from storage", map.len());
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.inner.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, round_id: Uuid) -> Option<Arc<Round>> {
        self.inner.slot(round_id).map(|slot| slot.snapshot())
    }

    /// Open rounds, oldest first.
    pub fn list_open(&self) -> Vec<Arc<Round>> {
        let mut open: Vec<Arc<Round>> = self
            .inner
            .read_map()
            .values()
            .map(|slot| slot.snapshot())
            .filter(|round| round.is_open())
            .collect();
        open.sort_by_key(|round| round.created_at);
        open
    }

    /// Store a brand new round.
    pub async fn insert(&self, round: Round) -> Result<Arc<Round>> {
        self.insert_then(round, |_| {}).await
    }

    /// Store a brand new round and run `on_commit` once it is stored.
    ///
    /// `on_commit` runs in the same blocking unit as the write, so it runs
    /// even if the returned future is dropped after the write has started.
    pub async fn insert_then<C>(&self, round: Round, on_commit: C) -> Result<Arc<Round>>
    where
        C: FnOnce(&Round) + Send + 'static,
    {
        if self.inner.slot(round.id).is_some() {
            return Err(RoundError::internal(format!("Round {} already registered", round.id)));
        }

        let inner = self.inner.clone();
        run_blocking(move || {
            inner.db.insert_round(&round)?;
            let snapshot = Arc::new(round.clone());
            inner
                .write_map()
                .insert(round.id, Arc::new(RoundSlot::new(round)));
            on_commit(&snapshot);
            Ok(snapshot)
        })
        .await
    }

    /// Apply `f` to a copy of the round under the round's mutation lock.
    ///
    /// The copy only replaces the stored round once SQLite has committed it.
    /// When `f` fails, or the write fails, the round is left untouched. When
    /// `f` leaves the round unchanged nothing is written and the current
    /// snapshot is returned as is.
    ///
    /// Once the write has started it always runs to completion, even if the
    /// returned future is dropped; the lock is held until then.
    pub async fn mutate<T, F>(&self, round_id: Uuid, f: F) -> Result<(Arc<Round>, T)>
    where
        F: FnOnce(&mut Round) -> Result<T>,
        T: Send + 'static,
    {
        self.mutate_then(round_id, f, |_, _| {}).await
    }

    /// `mutate`, then `on_commit` with the committed round and the value
    /// `f` returned. `on_commit` only runs when something was written, and
    /// it runs under the round's lock in the same blocking unit as the
    /// write, so a dropped future cannot separate the two.
    pub async fn mutate_then<T, F, C>(&self, round_id: Uuid, f: F, on_commit: C) -> Result<(Arc<Round>, T)>
    where
        F: FnOnce(&mut Round) -> Result<T>,
        T: Send + 'static,
        C: FnOnce(&Round, &T) + Send + 'static,
    {
        let slot = self
            .inner
            .slot(round_id)
            .ok_or_else(|| RoundError::round_not_found(round_id))?;
        let guard: OwnedMutexGuard<()> = slot.write_lock.clone().lock_owned().await;
        if slot.removed.load(Ordering::Acquire) {
            return Err(RoundError::round_not_found(round_id));
        }

        let before = slot.snapshot();
        let mut next = Round::clone(&before);
        let value = f(&mut next)?;
        if next == *before {
            debug!("Round {} unchanged, skipping write", round_id);
            return Ok((before, value));
        }

        let db = self.inner.db.clone();
        run_blocking(move || {
            let _guard = guard;
            db.save_round(&next)?;
            let next = Arc::new(next);
            slot.replace(next.clone());
            on_commit(&next, &value);
            Ok((next, value))
        })
        .await
    }

    /// Drop a round and every proposal it owns. Returns `false` when the
    /// round was not registered.
    pub async fn remove(&self, round_id: Uuid) -> Result<bool> {
        let Some(slot) = self.inner.slot(round_id) else {
            return Ok(false);
        };
        let guard = slot.write_lock.clone().lock_owned().await;
        if slot.removed.load(Ordering::Acquire) {
            return Ok(false);
        }

        let inner = self.inner.clone();
        run_blocking(move || {
            let _guard = guard;
            inner.db.delete_round(round_id)?;
            slot.removed.store(true, Ordering::Release);
            inner.write_map().remove(&round_id);
            info!("Round {} removed", round_id);
            Ok(true)
        })
        .await
    }
}

impl RegistryInner {
    fn slot(&self, round_id: Uuid) -> Option<Arc<RoundSlot>> {
        self.read_map().get(&round_id).cloned()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<RoundSlot>>> {
        self.rounds.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<RoundSlot>>> {
        self.rounds.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run a blocking storage step off the async runtime, turning storage
/// failures into internal errors.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(RoundError::internal)?
        .map_err(RoundError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lunchbox_types::error::ConflictKind;
    use lunchbox_types::models::Proposal;

    fn registry() -> (RoundRegistry, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (RoundRegistry::new(db.clone()), db)
    }

    fn proposal(round: &Round, by: &str, label: &str) -> Proposal {
        Proposal {
            id: Uuid::new_v4(),
            round_id: round.id,
            label: label.into(),
            location: None,
            note: None,
            submitted_by: by.into(),
        }
    }

    #[tokio::test]
    async fn insert_then_get() {
        let (registry, _) = registry();
        let round = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap();

        let fetched = registry.get(round.id).unwrap();
        assert_eq!(fetched, round);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn mutate_unknown_round_is_not_found() {
        let (registry, _) = registry();
        let err = registry.mutate(Uuid::new_v4(), |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, RoundError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_mutation_leaves_round_untouched() {
        let (registry, db) = registry();
        let round = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap();

        let err = registry
            .mutate(round.id, |r| {
                r.add_participant("u2")?;
                r.close("u1", Utc::now(), |_| 0).map(|_| ())
            })
            .await
            .unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::NoProposals));

        let current = registry.get(round.id).unwrap();
        assert_eq!(current.participants, vec!["u1".to_string()]);
        let stored = db.load_rounds().unwrap();
        assert_eq!(stored[0].participants, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn unchanged_mutation_returns_same_snapshot() {
        let (registry, _) = registry();
        let round = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap();

        let (after, added) = registry
            .mutate(round.id, |r| r.add_participant("u1"))
            .await
            .unwrap();
        assert!(!added);
        assert!(Arc::ptr_eq(&after, &registry.get(round.id).unwrap()));
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot() {
        let (registry, _) = registry();
        let round = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap();
        let before = registry.get(round.id).unwrap();

        registry
            .mutate(round.id, |r| r.add_participant("u2"))
            .await
            .unwrap();

        assert_eq!(before.participants.len(), 1);
        assert_eq!(registry.get(round.id).unwrap().participants.len(), 2);
    }

    #[tokio::test]
    async fn committed_state_survives_reload() {
        let (registry, db) = registry();
        let round = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap();
        registry
            .mutate(round.id, |r| {
                r.add_participant("u2")?;
                let p = proposal(r, "u2", "Place A");
                r.add_proposal(p)?;
                r.close("u1", Utc::now(), |_| 0).map(|p| p.id)
            })
            .await
            .unwrap();

        let reloaded = RoundRegistry::load(db).unwrap();
        let restored = reloaded.get(round.id).unwrap();
        assert_eq!(restored, registry.get(round.id).unwrap());
        assert!(reloaded.list_open().is_empty());
    }

    #[tokio::test]
    async fn concurrent_joins_on_one_round_are_serialized() {
        let (registry, _) = registry();
        let round_id = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap().id;

        let mut handles = Vec::new();
        for i in 0..20 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .mutate(round_id, move |r| r.add_participant(&format!("user-{}", i)))
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().1);
        }

        let current = registry.get(round_id).unwrap();
        assert_eq!(current.participants.len(), 21);
        assert_eq!(current.participants[0], "u1");
    }

    #[tokio::test]
    async fn list_open_skips_closed_rounds() {
        let (registry, _) = registry();
        let first = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap();
        let second = registry.insert(Round::open("u2".into(), Utc::now())).await.unwrap();

        registry
            .mutate(first.id, |r| {
                let p = proposal(r, "u1", "Place A");
                r.add_proposal(p)?;
                r.close("u1", Utc::now(), |_| 0).map(|_| ())
            })
            .await
            .unwrap();

        let open: Vec<Uuid> = registry.list_open().iter().map(|r| r.id).collect();
        assert_eq!(open, vec![second.id]);
    }

    #[tokio::test]
    async fn remove_deletes_owned_proposals() {
        let (registry, db) = registry();
        let round = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap();
        registry
            .mutate(round.id, |r| {
                let p = proposal(r, "u1", "Place A");
                r.add_proposal(p).map(|_| ())
            })
            .await
            .unwrap();
        assert_eq!(db.count_proposals(round.id).unwrap(), 1);

        assert!(registry.remove(round.id).await.unwrap());
        assert!(registry.get(round.id).is_none());
        assert_eq!(db.count_proposals(round.id).unwrap(), 0);
        assert!(!registry.remove(round.id).await.unwrap());

        let err = registry.mutate(round.id, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, RoundError::NotFound(_)));
    }

    #[tokio::test]
    async fn on_commit_sees_committed_round_and_value() {
        let (registry, _) = registry();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let log = seen.clone();
        let round = registry
            .insert_then(Round::open("u1".into(), Utc::now()), move |r: &Round| {
                log.lock().unwrap().push(r.participants.len());
            })
            .await
            .unwrap();

        let log = seen.clone();
        registry
            .mutate_then(
                round.id,
                |r| r.add_participant("u2"),
                move |r: &Round, joined: &bool| {
                    assert!(*joined);
                    log.lock().unwrap().push(r.participants.len());
                },
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn on_commit_skipped_without_a_write() {
        let (registry, _) = registry();
        let round = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap();
        let calls = Arc::new(AtomicBool::new(false));

        let flag = calls.clone();
        let err = registry
            .mutate_then(
                round.id,
                |r| r.close("u1", Utc::now(), |_| 0).map(|_| ()),
                move |_: &Round, _: &()| flag.store(true, Ordering::SeqCst),
            )
            .await
            .unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::NoProposals));

        let flag = calls.clone();
        registry
            .mutate_then(round.id, |r| r.add_participant("u1"), move |_: &Round, _: &bool| flag.store(true, Ordering::SeqCst))
            .await
            .unwrap();

        assert!(!calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn on_commit_survives_a_dropped_caller() {
        let (registry, _) = registry();
        let round_id = registry.insert(Round::open("u1".into(), Utc::now())).await.unwrap().id;
        let (tx, rx) = tokio::sync::oneshot::channel();

        // Zero timeout polls the mutation once, then drops it
        let _ = tokio::time::timeout(
            std::time::Duration::ZERO,
            registry.mutate_then(round_id, |r| r.add_participant("u2"), move |r: &Round, _: &bool| {
                let _ = tx.send(r.participants.len());
            }),
        )
        .await;

        assert_eq!(rx.await.unwrap(), 2);
        assert!(registry.get(round_id).unwrap().is_participant("u2"));
    }
}
