//! PostgreSQL adapter for invite storage.
//!
//! Binding relies on a single conditional `UPDATE ... WHERE bound_at IS NULL`
//! plus unique constraints on every identity column. Droplet assignment and
//! water rotation redraws each run in one transaction serialized by an
//! advisory lock.

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
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

// Keys for pg_advisory_xact_lock.
const DROPLET_ASSIGN_LOCK: i64 = 0x1D70_0001;
const WATER_ROTATION_LOCK: i64 = 0x1D70_0002;

const ROTATION_SELECT: &str = r#"
    SELECT w.invite_code, w.created_at, (c.bound_at IS NOT NULL) AS used
      FROM water_rotations w
      JOIN invite_codes c ON c.code = w.invite_code
     ORDER BY w.id ASC
"#;

const CODE_COLUMNS: &str =
    "code, code_type, wallet_address, discord_id, discord_name, user_id, bound_at, created_at";

/// PostgreSQL-backed invite storage.
#[derive(Clone)]
pub struct PostgresInviteStore {
    pool: PgPool,
}

impl PostgresInviteStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect postgres: {e}")))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS invite_codes (
                id BIGSERIAL PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                code_type SMALLINT NOT NULL,
                wallet_address TEXT UNIQUE,
                discord_id TEXT UNIQUE,
                discord_name TEXT,
                user_id TEXT UNIQUE,
                bound_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS invite_codes_type_unbound_idx
                ON invite_codes (code_type, id)
                WHERE bound_at IS NULL
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS droplet_codes (
                id BIGSERIAL PRIMARY KEY,
                invite_code TEXT NOT NULL REFERENCES invite_codes (code),
                round INTEGER NOT NULL,
                droplet_index INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (invite_code, round)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS droplet_codes_slot_idx
                ON droplet_codes (round, droplet_index)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS water_rotations (
                id BIGSERIAL PRIMARY KEY,
                invite_code TEXT NOT NULL REFERENCES invite_codes (code),
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS water_rotations_invite_code_key
                ON water_rotations (invite_code)
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl CodeStore for PostgresInviteStore {
    async fn create_code(
        &self,
        code: &str,
        code_type: CodeType,
        created_at: DateTime<Utc>,
    ) -> StoreResult<InviteCode> {
        sqlx::query("INSERT INTO invite_codes (code, code_type, created_at) VALUES ($1, $2, $3)")
            .bind(code)
            .bind(code_type.as_i16())
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match unique_violation(&e) {
                Some(_) => StoreError::DuplicateCode(code.to_string()),
                None => StoreError::Backend(e.to_string()),
            })?;

        Ok(InviteCode::unbound(code, code_type, created_at))
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<InviteCode>> {
        let row = sqlx::query(&format!(
            "SELECT {CODE_COLUMNS} FROM invite_codes WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(code_row_to_record).transpose()
    }

    async fn find_by_owner(&self, key: &IdentityKey) -> StoreResult<Option<InviteCode>> {
        // Column name comes from a closed set, never from input.
        let row = sqlx::query(&format!(
            "SELECT {CODE_COLUMNS} FROM invite_codes WHERE {} = $1",
            key.field()
        ))
        .bind(key.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(code_row_to_record).transpose()
    }

    async fn count_by_type(&self, code_type: CodeType) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invite_codes WHERE code_type = $1")
            .bind(code_type.as_i16())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    async fn count_unbound_by_type(&self, code_type: CodeType) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invite_codes WHERE code_type = $1 AND bound_at IS NULL",
        )
        .bind(code_type.as_i16())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    async fn pick_random_unbound(&self, code_type: CodeType) -> StoreResult<Option<InviteCode>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {CODE_COLUMNS}
              FROM invite_codes
             WHERE code_type = $1 AND bound_at IS NULL
             ORDER BY random()
             LIMIT 1
            "#
        ))
        .bind(code_type.as_i16())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(code_row_to_record).transpose()
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

        let result = sqlx::query(&format!(
            r#"
            UPDATE invite_codes
               SET wallet_address = $2,
                   discord_id = $3,
                   discord_name = $4,
                   user_id = $5,
                   bound_at = $6
             WHERE code = $1 AND bound_at IS NULL
            RETURNING {CODE_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(owner.wallet_address.as_deref())
        .bind(owner.discord_id.as_deref())
        .bind(owner.discord_name.as_deref())
        .bind(owner.user_id.as_deref())
        .bind(bound_at)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(row)) => Ok(BindOutcome::Bound(code_row_to_record(row)?)),
            Ok(None) => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM invite_codes WHERE code = $1)")
                        .bind(code)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(if exists {
                    BindOutcome::AlreadyBound
                } else {
                    BindOutcome::NotFound
                })
            }
            Err(err) => match unique_violation(&err) {
                Some(constraint) => Ok(BindOutcome::OwnerTaken(taken_key(&keys, constraint))),
                None => Err(StoreError::Backend(err.to_string())),
            },
        }
    }
}

#[async_trait]
impl DropletStore for PostgresInviteStore {
    async fn list_droplet_codes(&self) -> StoreResult<Vec<DropletCode>> {
        let rows = sqlx::query(
            "SELECT invite_code, round, droplet_index, created_at FROM droplet_codes ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter().map(droplet_row_to_record).collect()
    }

    async fn assign_droplet_slots(
        &self,
        fills: &[SlotFill],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<DropletCode>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(DROPLET_ASSIGN_LOCK)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        for fill in fills {
            let current: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM droplet_codes WHERE round = $1 AND droplet_index = $2",
            )
            .bind(to_i32(fill.round)?)
            .bind(to_i32(fill.droplet_index)?)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            if current != i64::from(fill.existing) {
                return Err(StoreError::Conflict(format!(
                    "slot ({}, {}) holds {} codes, planned against {}",
                    fill.round, fill.droplet_index, current, fill.existing
                )));
            }
        }

        let needed: u64 = fills.iter().map(|fill| u64::from(fill.missing)).sum();
        let fresh: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.code
              FROM invite_codes c
             WHERE c.code_type = $1
               AND c.bound_at IS NULL
               AND NOT EXISTS (SELECT 1 FROM droplet_codes d WHERE d.invite_code = c.code)
             ORDER BY c.id ASC
             LIMIT $2
            "#,
        )
        .bind(CodeType::Water.as_i16())
        .bind(i64::try_from(needed).map_err(|_| {
            StoreError::InvalidInput("droplet top-up too large".to_string())
        })?)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if (fresh.len() as u64) < needed {
            return Err(StoreError::InsufficientPool {
                needed,
                available: fresh.len() as u64,
            });
        }

        let mut pool = fresh.into_iter();
        let mut rows = Vec::with_capacity(needed as usize);
        for fill in fills {
            for _ in 0..fill.missing {
                let code = pool
                    .next()
                    .ok_or_else(|| StoreError::Backend("droplet pool drained".to_string()))?;
                sqlx::query(
                    r#"
                    INSERT INTO droplet_codes (invite_code, round, droplet_index, created_at)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(&code)
                .bind(to_i32(fill.round)?)
                .bind(to_i32(fill.droplet_index)?)
                .bind(created_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| match unique_violation(&e) {
                    Some(_) => StoreError::Conflict(format!(
                        "code {code} already placed in round {}",
                        fill.round
                    )),
                    None => StoreError::Backend(e.to_string()),
                })?;

                rows.push(DropletCode {
                    code,
                    round: fill.round,
                    droplet_index: fill.droplet_index,
                    created_at,
                });
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(rows)
    }

    async fn latest_round_with_status(&self) -> StoreResult<Vec<DropletCodeStatus>> {
        let rows = sqlx::query(
            r#"
            SELECT d.invite_code, d.round, d.droplet_index, (c.bound_at IS NOT NULL) AS used
              FROM droplet_codes d
              JOIN invite_codes c ON c.code = d.invite_code
             WHERE d.round = (SELECT MAX(round) FROM droplet_codes)
             ORDER BY d.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(DropletCodeStatus {
                    code: row
                        .try_get("invite_code")
                        .map_err(|e| StoreError::Backend(e.to_string()))?,
                    round: from_i32(
                        row.try_get("round")
                            .map_err(|e| StoreError::Backend(e.to_string()))?,
                    )?,
                    droplet_index: from_i32(
                        row.try_get("droplet_index")
                            .map_err(|e| StoreError::Backend(e.to_string()))?,
                    )?,
                    used: row
                        .try_get("used")
                        .map_err(|e| StoreError::Backend(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn count_unassigned_water(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
              FROM invite_codes c
             WHERE c.code_type = $1
               AND c.bound_at IS NULL
               AND NOT EXISTS (SELECT 1 FROM droplet_codes d WHERE d.invite_code = c.code)
            "#,
        )
        .bind(CodeType::Water.as_i16())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl RotationStore for PostgresInviteStore {
    async fn rotation_snapshot(&self) -> StoreResult<Vec<RotationEntry>> {
        let rows = sqlx::query(ROTATION_SELECT)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter().map(rotation_row_to_record).collect()
    }

    async fn replace_rotation(
        &self,
        size: usize,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<RotationEntry>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        lock_rotation(&mut *tx).await?;
        let entries = redraw_rotation(&mut *tx, size, created_at).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(entries)
    }

    async fn refresh_rotation_if_stale(
        &self,
        size: usize,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RotationRefresh> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        lock_rotation(&mut *tx).await?;
        let current = sqlx::query(ROTATION_SELECT)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .into_iter()
            .map(rotation_row_to_record)
            .collect::<StoreResult<Vec<_>>>()?;

        let oldest = current.iter().map(|entry| entry.created_at).min();
        let refresh = if rotation_is_stale(oldest, max_age, now) {
            RotationRefresh {
                entries: redraw_rotation(&mut *tx, size, now).await?,
                refreshed: true,
            }
        } else {
            RotationRefresh {
                entries: current,
                refreshed: false,
            }
        };

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(refresh)
    }
}

async fn lock_rotation(conn: &mut PgConnection) -> StoreResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(WATER_ROTATION_LOCK)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(())
}

/// Delete and redraw the snapshot. The caller holds the rotation lock.
async fn redraw_rotation(
    conn: &mut PgConnection,
    size: usize,
    created_at: DateTime<Utc>,
) -> StoreResult<Vec<RotationEntry>> {
    let limit = i64::try_from(size)
        .map_err(|_| StoreError::InvalidInput("rotation size too large".to_string()))?;

    sqlx::query("DELETE FROM water_rotations")
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    let codes: Vec<String> = sqlx::query_scalar(
        r#"
        INSERT INTO water_rotations (invite_code, created_at)
        SELECT code, $2
          FROM invite_codes
         WHERE code_type = $1 AND bound_at IS NULL
         ORDER BY random()
         LIMIT $3
        RETURNING invite_code
        "#,
    )
    .bind(CodeType::Water.as_i16())
    .bind(created_at)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| StoreError::Backend(e.to_string()))?;

    Ok(codes
        .into_iter()
        .map(|code| RotationEntry {
            code,
            used: false,
            created_at,
        })
        .collect())
}

/// Constraint name of a unique violation (SQLSTATE 23505), if `err` is one.
fn unique_violation(err: &sqlx::Error) -> Option<&str> {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return Some(db_err.constraint().unwrap_or_default());
        }
    }
    None
}

// Postgres names column constraints `<table>_<column>_key`.
fn taken_key(keys: &[IdentityKey], constraint: &str) -> IdentityKey {
    keys.iter()
        .find(|key| constraint.contains(key.field()))
        .or_else(|| keys.first())
        .cloned()
        .unwrap_or_else(|| IdentityKey::User(String::new()))
}

fn to_i32(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::InvalidInput(format!("{value} out of range")))
}

fn from_i32(value: i32) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Serialization(format!("negative slot {value}")))
}

fn code_row_to_record(row: PgRow) -> StoreResult<InviteCode> {
    let tag: i16 = row
        .try_get("code_type")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let code_type = CodeType::from_i16(tag)
        .ok_or_else(|| StoreError::Serialization(format!("unknown code type {tag}")))?;
    let bound_at: Option<DateTime<Utc>> = row
        .try_get("bound_at")
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    let owner = Owner {
        wallet_address: row
            .try_get("wallet_address")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        discord_id: row
            .try_get("discord_id")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        discord_name: row
            .try_get("discord_name")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
    };

    Ok(InviteCode {
        code: row
            .try_get("code")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        code_type,
        owner: bound_at.map(|_| owner),
        bound_at,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
    })
}

fn droplet_row_to_record(row: PgRow) -> StoreResult<DropletCode> {
    Ok(DropletCode {
        code: row
            .try_get("invite_code")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        round: from_i32(
            row.try_get("round")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
        )?,
        droplet_index: from_i32(
            row.try_get("droplet_index")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
        )?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
    })
}

fn rotation_row_to_record(row: PgRow) -> StoreResult<RotationEntry> {
    Ok(RotationEntry {
        code: row
            .try_get("invite_code")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        used: row
            .try_get("used")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taken_key_follows_constraint_name() {
        let keys = vec![
            IdentityKey::Wallet("0x1".into()),
            IdentityKey::Discord("d-1".into()),
        ];
        assert_eq!(
            taken_key(&keys, "invite_codes_discord_id_key"),
            IdentityKey::Discord("d-1".into())
        );
        assert_eq!(taken_key(&keys, ""), IdentityKey::Wallet("0x1".into()));
    }

    async fn connect() -> PostgresInviteStore {
        let url = std::env::var("INVITE_TEST_DATABASE_URL")
            .expect("INVITE_TEST_DATABASE_URL must point at a scratch database");
        let store = PostgresInviteStore::connect(&url).await.unwrap();
        sqlx::query("TRUNCATE water_rotations, droplet_codes, invite_codes RESTART IDENTITY")
            .execute(store.pool())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    #[ignore = "requires INVITE_TEST_DATABASE_URL"]
    async fn concurrent_binds_on_one_code_admit_one_winner() {
        let store = connect().await;
        store
            .create_code("ABC12345", CodeType::Direct, Utc::now())
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .bind_if_unbound("ABC12345", &Owner::wallet(format!("0x{i}")), Utc::now())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut bound = 0;
        for handle in handles {
            match handle.await.unwrap() {
                BindOutcome::Bound(_) => bound += 1,
                BindOutcome::AlreadyBound => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(bound, 1);
    }

    #[tokio::test]
    #[ignore = "requires INVITE_TEST_DATABASE_URL"]
    async fn identity_conflict_reports_owner_taken() {
        let store = connect().await;
        for code in ["AAAA0001", "AAAA0002"] {
            store
                .create_code(code, CodeType::Direct, Utc::now())
                .await
                .unwrap();
        }

        let owner = Owner::wallet("0xAbC");
        store
            .bind_if_unbound("AAAA0001", &owner, Utc::now())
            .await
            .unwrap();
        let outcome = store
            .bind_if_unbound("AAAA0002", &owner, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, BindOutcome::OwnerTaken(IdentityKey::wallet("0xabc")));
    }

    #[tokio::test]
    #[ignore = "requires INVITE_TEST_DATABASE_URL"]
    async fn droplet_shortfall_writes_nothing() {
        let store = connect().await;
        store
            .create_code("W0000001", CodeType::Water, Utc::now())
            .await
            .unwrap();

        let fills = [SlotFill {
            round: 0,
            droplet_index: 0,
            existing: 0,
            missing: 2,
        }];
        let result = store.assign_droplet_slots(&fills, Utc::now()).await;
        assert!(matches!(result, Err(StoreError::InsufficientPool { .. })));
        assert!(store.list_droplet_codes().await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires INVITE_TEST_DATABASE_URL"]
    async fn concurrent_rotation_refreshes_keep_one_snapshot() {
        let store = connect().await;
        for n in 0..40 {
            store
                .create_code(&format!("W{n:07}"), CodeType::Water, Utc::now())
                .await
                .unwrap();
        }

        for _ in 0..20 {
            let now = Utc::now();
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = store.clone();
                    tokio::spawn(async move {
                        if i % 2 == 0 {
                            store.replace_rotation(10, now).await.unwrap();
                        } else {
                            store
                                .refresh_rotation_if_stale(10, Duration::zero(), now)
                                .await
                                .unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }

            let snapshot = store.rotation_snapshot().await.unwrap();
            assert_eq!(snapshot.len(), 10);
        }

        let now = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .refresh_rotation_if_stale(10, Duration::hours(1), now + Duration::hours(2))
                        .await
                        .unwrap()
                        .refreshed
                })
            })
            .collect();
        let mut redraws = 0;
        for handle in handles {
            redraws += usize::from(handle.await.unwrap());
        }
        assert_eq!(redraws, 1);
    }
}
