//! In-memory reference implementation of the storage traits.
//!
//! Every operation runs under one lock over the whole state, which gives the
//! same all-or-nothing behaviour a transactional backend provides. Production
//! deployments should use PostgreSQL.

use super::{
    rotation_is_stale, BindOutcome, CodeStore, DropletStore, RotationRefresh, RotationStore,
    StoreError, StoreResult,
};
use crate::droplet::SlotFill;
use crate::model::{
    CodeType, DropletCode, DropletCodeStatus, IdentityKey, InviteCode, Owner, RotationEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct StoredCode {
    sequence: u64,
    record: InviteCode,
}

#[derive(Debug, Clone)]
struct StoredRotation {
    code: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    next_sequence: u64,
    codes: HashMap<String, StoredCode>,
    owners: HashMap<IdentityKey, String>,
    droplets: Vec<DropletCode>,
    rotation: Vec<StoredRotation>,
}

impl State {
    fn is_bound(&self, code: &str) -> bool {
        self.codes
            .get(code)
            .map(|stored| stored.record.is_bound())
            .unwrap_or(false)
    }

    fn rotation_entries(&self) -> Vec<RotationEntry> {
        self.rotation
            .iter()
            .map(|entry| RotationEntry {
                code: entry.code.clone(),
                used: self.is_bound(&entry.code),
                created_at: entry.created_at,
            })
            .collect()
    }

    fn redraw_rotation(&mut self, size: usize, created_at: DateTime<Utc>) -> Vec<RotationEntry> {
        let mut rng = rand::thread_rng();
        let picked = self
            .codes
            .values()
            .filter(|stored| stored.record.code_type == CodeType::Water && !stored.record.is_bound())
            .map(|stored| stored.record.code.clone())
            .choose_multiple(&mut rng, size);

        self.rotation = picked
            .iter()
            .map(|code| StoredRotation {
                code: code.clone(),
                created_at,
            })
            .collect();

        picked
            .into_iter()
            .map(|code| RotationEntry {
                code,
                used: false,
                created_at,
            })
            .collect()
    }

    fn slot_len(&self, round: u32, droplet_index: u32) -> u32 {
        self.droplets
            .iter()
            .filter(|d| d.round == round && d.droplet_index == droplet_index)
            .count() as u32
    }
}

/// In-memory invite storage.
#[derive(Debug, Default)]
pub struct InMemoryInviteStore {
    state: RwLock<State>,
}

impl InMemoryInviteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("invite state lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("invite state lock poisoned".to_string()))
    }
}

#[async_trait]
impl CodeStore for InMemoryInviteStore {
    async fn create_code(
        &self,
        code: &str,
        code_type: CodeType,
        created_at: DateTime<Utc>,
    ) -> StoreResult<InviteCode> {
        let mut guard = self.write()?;
        if guard.codes.contains_key(code) {
            return Err(StoreError::DuplicateCode(code.to_string()));
        }

        let record = InviteCode::unbound(code, code_type, created_at);
        let sequence = guard.next_sequence;
        guard.next_sequence += 1;
        guard.codes.insert(
            code.to_string(),
            StoredCode {
                sequence,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<InviteCode>> {
        let guard = self.read()?;
        Ok(guard.codes.get(code).map(|stored| stored.record.clone()))
    }

    async fn find_by_owner(&self, key: &IdentityKey) -> StoreResult<Option<InviteCode>> {
        let guard = self.read()?;
        Ok(guard
            .owners
            .get(key)
            .and_then(|code| guard.codes.get(code))
            .map(|stored| stored.record.clone()))
    }

    async fn count_by_type(&self, code_type: CodeType) -> StoreResult<u64> {
        let guard = self.read()?;
        Ok(guard
            .codes
            .values()
            .filter(|stored| stored.record.code_type == code_type)
            .count() as u64)
    }

    async fn count_unbound_by_type(&self, code_type: CodeType) -> StoreResult<u64> {
        let guard = self.read()?;
        Ok(guard
            .codes
            .values()
            .filter(|stored| stored.record.code_type == code_type && !stored.record.is_bound())
            .count() as u64)
    }

    async fn pick_random_unbound(&self, code_type: CodeType) -> StoreResult<Option<InviteCode>> {
        let guard = self.read()?;
        let mut rng = rand::thread_rng();
        Ok(guard
            .codes
            .values()
            .filter(|stored| stored.record.code_type == code_type && !stored.record.is_bound())
            .choose(&mut rng)
            .map(|stored| stored.record.clone()))
    }

    async fn bind_if_unbound(
        &self,
        code: &str,
        owner: &Owner,
        bound_at: DateTime<Utc>,
    ) -> StoreResult<BindOutcome> {
        let keys = owner.identity_keys();
        if keys.is_empty() {
            return Err(StoreError::InvalidInput(
                "owner carries no identity field".to_string(),
            ));
        }

        let mut guard = self.write()?;
        match guard.codes.get(code) {
            None => return Ok(BindOutcome::NotFound),
            Some(stored) if stored.record.is_bound() => return Ok(BindOutcome::AlreadyBound),
            Some(_) => {}
        }

        if let Some(taken) = keys.iter().find(|key| guard.owners.contains_key(*key)) {
            return Ok(BindOutcome::OwnerTaken(taken.clone()));
        }

        for key in keys {
            guard.owners.insert(key, code.to_string());
        }
        let stored = guard
            .codes
            .get_mut(code)
            .ok_or_else(|| StoreError::Backend(format!("code {code} vanished under lock")))?;
        stored.record.owner = Some(owner.clone());
        stored.record.bound_at = Some(bound_at);
        Ok(BindOutcome::Bound(stored.record.clone()))
    }
}

#[async_trait]
impl DropletStore for InMemoryInviteStore {
    async fn list_droplet_codes(&self) -> StoreResult<Vec<DropletCode>> {
        let guard = self.read()?;
        Ok(guard.droplets.clone())
    }

    async fn assign_droplet_slots(
        &self,
        fills: &[SlotFill],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<DropletCode>> {
        let mut guard = self.write()?;

        for fill in fills {
            let current = guard.slot_len(fill.round, fill.droplet_index);
            if current != fill.existing {
                return Err(StoreError::Conflict(format!(
                    "slot ({}, {}) holds {} codes, planned against {}",
                    fill.round, fill.droplet_index, current, fill.existing
                )));
            }
        }

        let needed: u64 = fills.iter().map(|fill| u64::from(fill.missing)).sum();
        let assigned: HashSet<&str> = guard.droplets.iter().map(|d| d.code.as_str()).collect();
        let mut fresh = guard
            .codes
            .values()
            .filter(|stored| {
                stored.record.code_type == CodeType::Water
                    && !stored.record.is_bound()
                    && !assigned.contains(stored.record.code.as_str())
            })
            .collect::<Vec<_>>();
        fresh.sort_by_key(|stored| stored.sequence);

        if (fresh.len() as u64) < needed {
            return Err(StoreError::InsufficientPool {
                needed,
                available: fresh.len() as u64,
            });
        }

        let mut pool = fresh.into_iter().map(|stored| stored.record.code.clone());
        let mut rows = Vec::with_capacity(needed as usize);
        for fill in fills {
            for _ in 0..fill.missing {
                let code = pool
                    .next()
                    .ok_or_else(|| StoreError::Backend("droplet pool drained".to_string()))?;
                rows.push(DropletCode {
                    code,
                    round: fill.round,
                    droplet_index: fill.droplet_index,
                    created_at,
                });
            }
        }
        drop(pool);

        guard.droplets.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn latest_round_with_status(&self) -> StoreResult<Vec<DropletCodeStatus>> {
        let guard = self.read()?;
        let Some(latest) = guard.droplets.iter().map(|d| d.round).max() else {
            return Ok(Vec::new());
        };

        Ok(guard
            .droplets
            .iter()
            .filter(|d| d.round == latest)
            .map(|d| DropletCodeStatus {
                code: d.code.clone(),
                round: d.round,
                droplet_index: d.droplet_index,
                used: guard.is_bound(&d.code),
            })
            .collect())
    }

    async fn count_unassigned_water(&self) -> StoreResult<u64> {
        let guard = self.read()?;
        let assigned: HashSet<&str> = guard.droplets.iter().map(|d| d.code.as_str()).collect();
        Ok(guard
            .codes
            .values()
            .filter(|stored| {
                stored.record.code_type == CodeType::Water
                    && !stored.record.is_bound()
                    && !assigned.contains(stored.record.code.as_str())
            })
            .count() as u64)
    }
}

#[async_trait]
impl RotationStore for InMemoryInviteStore {
    async fn rotation_snapshot(&self) -> StoreResult<Vec<RotationEntry>> {
        let guard = self.read()?;
        Ok(guard.rotation_entries())
    }

    async fn replace_rotation(
        &self,
        size: usize,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<RotationEntry>> {
        let mut guard = self.write()?;
        Ok(guard.redraw_rotation(size, created_at))
    }

    async fn refresh_rotation_if_stale(
        &self,
        size: usize,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RotationRefresh> {
        let mut guard = self.write()?;
        let oldest = guard.rotation.iter().map(|entry| entry.created_at).min();
        if !rotation_is_stale(oldest, max_age, now) {
            return Ok(RotationRefresh {
                entries: guard.rotation_entries(),
                refreshed: false,
            });
        }
        Ok(RotationRefresh {
            entries: guard.redraw_rotation(size, now),
            refreshed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn seeded(store: &InMemoryInviteStore, code_type: CodeType, codes: &[&str]) {
        for code in codes {
            store.create_code(code, code_type, Utc::now()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let store = InMemoryInviteStore::new();
        store
            .create_code("AAAA1111", CodeType::Direct, Utc::now())
            .await
            .unwrap();

        let result = store
            .create_code("AAAA1111", CodeType::Task, Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateCode(code)) if code == "AAAA1111"));
    }

    #[tokio::test]
    async fn lookups_report_absence_as_none() {
        let store = InMemoryInviteStore::new();
        assert!(store.find_by_code("NOPE0000").await.unwrap().is_none());
        assert!(store
            .find_by_owner(&IdentityKey::wallet("0xabc"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .pick_random_unbound(CodeType::Task)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn bind_is_compare_and_set() {
        let store = InMemoryInviteStore::new();
        seeded(&store, CodeType::Direct, &["ABC12345"]).await;

        let first = store
            .bind_if_unbound("ABC12345", &Owner::wallet("0xA"), Utc::now())
            .await
            .unwrap();
        assert!(matches!(first, BindOutcome::Bound(ref code) if code.is_bound()));

        let second = store
            .bind_if_unbound("ABC12345", &Owner::wallet("0xB"), Utc::now())
            .await
            .unwrap();
        assert_eq!(second, BindOutcome::AlreadyBound);

        let missing = store
            .bind_if_unbound("ZZZ99999", &Owner::wallet("0xC"), Utc::now())
            .await
            .unwrap();
        assert_eq!(missing, BindOutcome::NotFound);
    }

    #[tokio::test]
    async fn each_identity_field_is_unique() {
        let store = InMemoryInviteStore::new();
        seeded(&store, CodeType::Direct, &["AAAA0001", "AAAA0002"]).await;

        store
            .bind_if_unbound(
                "AAAA0001",
                &Owner::wallet("0x1").with_discord("d-1", None),
                Utc::now(),
            )
            .await
            .unwrap();

        let outcome = store
            .bind_if_unbound(
                "AAAA0002",
                &Owner::wallet("0x2").with_discord("d-1", None),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, BindOutcome::OwnerTaken(IdentityKey::Discord("d-1".into())));

        let unbound = store.find_by_code("AAAA0002").await.unwrap().unwrap();
        assert!(!unbound.is_bound());
        assert_eq!(store.count_unbound_by_type(CodeType::Direct).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn droplet_assignment_takes_oldest_fresh_codes() {
        let store = InMemoryInviteStore::new();
        seeded(&store, CodeType::Water, &["W0000001", "W0000002", "W0000003"]).await;

        let fills = [SlotFill {
            round: 0,
            droplet_index: 0,
            existing: 0,
            missing: 2,
        }];
        let rows = store.assign_droplet_slots(&fills, Utc::now()).await.unwrap();
        let codes: Vec<_> = rows.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["W0000001", "W0000002"]);
        assert_eq!(store.count_unassigned_water().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn droplet_assignment_is_all_or_nothing() {
        let store = InMemoryInviteStore::new();
        seeded(&store, CodeType::Water, &["W0000001", "W0000002", "W0000003"]).await;

        let fills = [
            SlotFill {
                round: 0,
                droplet_index: 0,
                existing: 0,
                missing: 2,
            },
            SlotFill {
                round: 0,
                droplet_index: 1,
                existing: 0,
                missing: 2,
            },
        ];
        let result = store.assign_droplet_slots(&fills, Utc::now()).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientPool {
                needed: 4,
                available: 3
            })
        ));
        assert!(store.list_droplet_codes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_slot_plan_is_rejected() {
        let store = InMemoryInviteStore::new();
        seeded(&store, CodeType::Water, &["W0000001", "W0000002", "W0000003"]).await;

        let fill = [SlotFill {
            round: 0,
            droplet_index: 0,
            existing: 0,
            missing: 1,
        }];
        store.assign_droplet_slots(&fill, Utc::now()).await.unwrap();

        let replay = store.assign_droplet_slots(&fill, Utc::now()).await;
        assert!(matches!(replay, Err(StoreError::Conflict(_))));
        assert_eq!(store.list_droplet_codes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rotation_replaces_whole_snapshot_with_unbound_water() {
        let store = InMemoryInviteStore::new();
        seeded(&store, CodeType::Water, &["W0000001", "W0000002", "W0000003"]).await;
        seeded(&store, CodeType::Direct, &["D0000001"]).await;
        store
            .bind_if_unbound("W0000003", &Owner::wallet("0x9"), Utc::now())
            .await
            .unwrap();

        let first = store.replace_rotation(10, Utc::now()).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|e| e.code.starts_with('W') && e.code != "W0000003"));

        let second = store.replace_rotation(1, Utc::now()).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(store.rotation_snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_check_and_redraw_share_one_unit() {
        let store = Arc::new(InMemoryInviteStore::new());
        let codes: Vec<String> = (0..40).map(|n| format!("W{n:07}")).collect();
        for code in &codes {
            store.create_code(code, CodeType::Water, Utc::now()).await.unwrap();
        }

        let now = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .refresh_rotation_if_stale(10, Duration::hours(1), now)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut redraws = 0;
        for handle in handles {
            let refresh = handle.await.unwrap();
            assert_eq!(refresh.entries.len(), 10);
            redraws += usize::from(refresh.refreshed);
        }
        assert_eq!(redraws, 1);

        let snapshot = store.rotation_snapshot().await.unwrap();
        let distinct: HashSet<&str> = snapshot.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(distinct.len(), 10);

        let later = store
            .refresh_rotation_if_stale(10, Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert!(later.refreshed);
    }
}
