//! SQLite storage backend for the VeriField indexer.
//!
//! Persists checkpoints and the read model to a single SQLite file.
//! Uses `sqlx` with WAL mode for concurrent read performance. Uniqueness
//! keys on the append-only tables turn every insert into insert-or-ignore,
//! and each changeset runs in its own transaction.
//!
//! # Usage
//! ```rust,ignore
//! use verifield_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./verifield.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use alloy_primitives::U256;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use verifield_core::checkpoint::{Checkpoint, CheckpointStore};
use verifield_core::error::IndexerError;
use verifield_core::model::{Activity, ActivityType, CreditEntry, Dataset, Ownership, Purchase};
use verifield_core::store::{ApplyOutcome, Changeset, DatasetWrite, ReadModelCounts, ReadModelStore};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS checkpoints (
        source_id    TEXT    NOT NULL PRIMARY KEY,
        block_number INTEGER NOT NULL,
        updated_at   INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS datasets (
        token_id        INTEGER NOT NULL PRIMARY KEY,
        owner           TEXT    NOT NULL,
        name            TEXT    NOT NULL,
        domain          TEXT    NOT NULL,
        tags            TEXT    NOT NULL,
        cid             TEXT    NOT NULL,
        license_uri     TEXT    NOT NULL,
        sha256sum       TEXT    NOT NULL,
        verified        INTEGER NOT NULL,
        buyers_count    INTEGER NOT NULL,
        minted_at_block INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS purchases (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        token_id     INTEGER NOT NULL,
        buyer        TEXT    NOT NULL,
        amount       TEXT    NOT NULL,
        tx_hash      TEXT    NOT NULL,
        block_number INTEGER NOT NULL,
        UNIQUE (tx_hash, token_id)
    );",
    "CREATE TABLE IF NOT EXISTS ownership (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        address           TEXT    NOT NULL,
        token_id          INTEGER NOT NULL,
        acquired_at_block INTEGER NOT NULL,
        tx_hash           TEXT    NOT NULL,
        log_index         INTEGER NOT NULL,
        UNIQUE (tx_hash, log_index)
    );",
    "CREATE TABLE IF NOT EXISTS activity (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        address       TEXT    NOT NULL,
        activity_type TEXT    NOT NULL,
        token_id      INTEGER NOT NULL,
        block_number  INTEGER NOT NULL,
        tx_hash       TEXT    NOT NULL,
        log_index     INTEGER NOT NULL,
        UNIQUE (tx_hash, log_index)
    );",
    "CREATE TABLE IF NOT EXISTS credit_ledger (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        address   TEXT    NOT NULL,
        delta     TEXT    NOT NULL,
        reason    TEXT    NOT NULL,
        tx_hash   TEXT    NOT NULL,
        log_index INTEGER NOT NULL,
        UNIQUE (tx_hash, log_index)
    );",
    "CREATE INDEX IF NOT EXISTS idx_activity_address ON activity (address);",
    "CREATE INDEX IF NOT EXISTS idx_ledger_address ON credit_ledger (address);",
    "CREATE INDEX IF NOT EXISTS idx_purchases_token ON purchases (token_id);",
];

/// SQLite-backed storage for checkpoints and the read model.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Persistence(e.to_string())
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./verifield.db"`) or a full
    /// SQLite URL (`"sqlite:./verifield.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // Every connection to `sqlite::memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    /// Create tables, optionally enabling WAL mode.
    async fn init_schema(&self, wal: bool) -> Result<(), IndexerError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn parse_u256(s: &str) -> Result<U256, IndexerError> {
    s.parse::<U256>()
        .map_err(|e| IndexerError::Persistence(format!("corrupt amount {s:?}: {e}")))
}

fn dataset_from_row(r: &SqliteRow) -> Result<Dataset, IndexerError> {
    let tags: String = r.get("tags");
    Ok(Dataset {
        token_id: r.get::<i64, _>("token_id") as u64,
        owner: r.get("owner"),
        name: r.get("name"),
        domain: r.get("domain"),
        tags: serde_json::from_str(&tags)
            .map_err(|e| IndexerError::Persistence(format!("corrupt tags: {e}")))?,
        cid: r.get("cid"),
        license_uri: r.get("license_uri"),
        sha256sum: r.get("sha256sum"),
        verified: r.get::<i64, _>("verified") != 0,
        buyers_count: r.get::<i64, _>("buyers_count") as u64,
        minted_at_block: r.get::<i64, _>("minted_at_block") as u64,
    })
}

async fn count(pool: &SqlitePool, table: &str) -> Result<u64, IndexerError> {
    let row = sqlx::query(&format!("SELECT COUNT(*) AS cnt FROM {table}"))
        .fetch_one(pool)
        .await
        .map_err(storage_err)?;
    Ok(row.get::<i64, _>("cnt") as u64)
}

// ─── ReadModelStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl ReadModelStore for SqliteStore {
    async fn apply(&self, changes: &Changeset) -> Result<ApplyOutcome, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut rows: u64 = 0;

        let purchase_inserted = match &changes.purchase {
            Some(p) => {
                let n = sqlx::query(
                    "INSERT OR IGNORE INTO purchases (token_id, buyer, amount, tx_hash, block_number)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(p.token_id as i64)
                .bind(&p.buyer)
                .bind(p.amount.to_string())
                .bind(&p.tx_hash)
                .bind(p.block_number as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
                .rows_affected();
                rows += n;
                n > 0
            }
            None => false,
        };

        match &changes.dataset {
            DatasetWrite::Create(ds) => {
                let tags = serde_json::to_string(&ds.tags)
                    .map_err(|e| IndexerError::Persistence(e.to_string()))?;
                rows += sqlx::query(
                    "INSERT OR IGNORE INTO datasets
                     (token_id, owner, name, domain, tags, cid, license_uri, sha256sum,
                      verified, buyers_count, minted_at_block)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(ds.token_id as i64)
                .bind(&ds.owner)
                .bind(&ds.name)
                .bind(&ds.domain)
                .bind(&tags)
                .bind(&ds.cid)
                .bind(&ds.license_uri)
                .bind(&ds.sha256sum)
                .bind(ds.verified as i64)
                .bind(ds.buyers_count as i64)
                .bind(ds.minted_at_block as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
                .rows_affected();
            }
            DatasetWrite::SetVerified { token_id, verified } => {
                let exists = sqlx::query("SELECT verified FROM datasets WHERE token_id = ?")
                    .bind(*token_id as i64)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                let Some(row) = exists else {
                    // Dropping `tx` rolls back.
                    return Err(IndexerError::Consistency {
                        event: "Verified".into(),
                        token_id: *token_id,
                        block_number: changes.activity.block_number,
                    });
                };
                if (row.get::<i64, _>("verified") != 0) != *verified {
                    rows += sqlx::query("UPDATE datasets SET verified = ? WHERE token_id = ?")
                        .bind(*verified as i64)
                        .bind(*token_id as i64)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?
                        .rows_affected();
                }
            }
            DatasetWrite::Sale { token_id, buyer } => {
                if purchase_inserted {
                    let n = sqlx::query(
                        "UPDATE datasets SET buyers_count = buyers_count + 1, owner = ?
                         WHERE token_id = ?",
                    )
                    .bind(buyer)
                    .bind(*token_id as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?
                    .rows_affected();
                    if n == 0 {
                        return Err(IndexerError::Consistency {
                            event: "Purchased".into(),
                            token_id: *token_id,
                            block_number: changes.activity.block_number,
                        });
                    }
                    rows += n;
                }
            }
        }

        if let Some(o) = &changes.ownership {
            rows += sqlx::query(
                "INSERT OR IGNORE INTO ownership
                 (address, token_id, acquired_at_block, tx_hash, log_index)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&o.address)
            .bind(o.token_id as i64)
            .bind(o.acquired_at_block as i64)
            .bind(&o.tx_hash)
            .bind(o.log_index as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        }

        let a = &changes.activity;
        rows += sqlx::query(
            "INSERT OR IGNORE INTO activity
             (address, activity_type, token_id, block_number, tx_hash, log_index)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&a.address)
        .bind(a.activity_type.as_str())
        .bind(a.token_id as i64)
        .bind(a.block_number as i64)
        .bind(&a.tx_hash)
        .bind(a.log_index as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?
        .rows_affected();

        if let Some(c) = &changes.credit {
            rows += sqlx::query(
                "INSERT OR IGNORE INTO credit_ledger (address, delta, reason, tx_hash, log_index)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&c.address)
            .bind(c.delta.to_string())
            .bind(&c.reason)
            .bind(&c.tx_hash)
            .bind(c.log_index as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(rows, token_id = a.token_id, "changeset committed");
        Ok(ApplyOutcome {
            rows_written: rows as usize,
        })
    }

    async fn dataset(&self, token_id: u64) -> Result<Option<Dataset>, IndexerError> {
        let row = sqlx::query("SELECT * FROM datasets WHERE token_id = ?")
            .bind(token_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(dataset_from_row).transpose()
    }

    async fn recent_datasets(&self, limit: usize) -> Result<Vec<Dataset>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM datasets ORDER BY minted_at_block DESC, token_id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(dataset_from_row).collect()
    }

    async fn purchases_for(&self, token_id: u64) -> Result<Vec<Purchase>, IndexerError> {
        let rows = sqlx::query(
            "SELECT token_id, buyer, amount, tx_hash, block_number
             FROM purchases WHERE token_id = ? ORDER BY id",
        )
        .bind(token_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| {
                Ok(Purchase {
                    token_id: r.get::<i64, _>("token_id") as u64,
                    buyer: r.get("buyer"),
                    amount: parse_u256(r.get("amount"))?,
                    tx_hash: r.get("tx_hash"),
                    block_number: r.get::<i64, _>("block_number") as u64,
                })
            })
            .collect()
    }

    async fn ownership_history(&self, token_id: u64) -> Result<Vec<Ownership>, IndexerError> {
        let rows = sqlx::query(
            "SELECT address, token_id, acquired_at_block, tx_hash, log_index
             FROM ownership WHERE token_id = ? ORDER BY acquired_at_block, log_index",
        )
        .bind(token_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .iter()
            .map(|r| Ownership {
                address: r.get("address"),
                token_id: r.get::<i64, _>("token_id") as u64,
                acquired_at_block: r.get::<i64, _>("acquired_at_block") as u64,
                tx_hash: r.get("tx_hash"),
                log_index: r.get::<i64, _>("log_index") as u32,
            })
            .collect())
    }

    async fn activity_for(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<Activity>, IndexerError> {
        let rows = sqlx::query(
            "SELECT address, activity_type, token_id, block_number, tx_hash, log_index
             FROM activity WHERE address = ?
             ORDER BY block_number DESC, log_index DESC LIMIT ?",
        )
        .bind(address.to_ascii_lowercase())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| {
                let kind: String = r.get("activity_type");
                Ok(Activity {
                    address: r.get("address"),
                    activity_type: ActivityType::parse(&kind).ok_or_else(|| {
                        IndexerError::Persistence(format!("unknown activity type {kind:?}"))
                    })?,
                    token_id: r.get::<i64, _>("token_id") as u64,
                    block_number: r.get::<i64, _>("block_number") as u64,
                    tx_hash: r.get("tx_hash"),
                    log_index: r.get::<i64, _>("log_index") as u32,
                })
            })
            .collect()
    }

    async fn ledger_for(&self, address: &str) -> Result<Vec<CreditEntry>, IndexerError> {
        let rows = sqlx::query(
            "SELECT address, delta, reason, tx_hash, log_index
             FROM credit_ledger WHERE address = ? ORDER BY id",
        )
        .bind(address.to_ascii_lowercase())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| {
                Ok(CreditEntry {
                    address: r.get("address"),
                    delta: parse_u256(r.get("delta"))?,
                    reason: r.get("reason"),
                    tx_hash: r.get("tx_hash"),
                    log_index: r.get::<i64, _>("log_index") as u32,
                })
            })
            .collect()
    }

    async fn counts(&self) -> Result<ReadModelCounts, IndexerError> {
        Ok(ReadModelCounts {
            datasets: count(&self.pool, "datasets").await?,
            purchases: count(&self.pool, "purchases").await?,
            ownership: count(&self.pool, "ownership").await?,
            activity: count(&self.pool, "activity").await?,
            ledger: count(&self.pool, "credit_ledger").await?,
        })
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT source_id, block_number, updated_at FROM checkpoints WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| Checkpoint {
            source_id: r.get("source_id"),
            block_number: r.get::<i64, _>("block_number") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save_all(&self, checkpoints: &[Checkpoint]) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for cp in checkpoints {
            sqlx::query(
                "INSERT OR REPLACE INTO checkpoints (source_id, block_number, updated_at)
                 VALUES (?, ?, ?)",
            )
            .bind(&cp.source_id)
            .bind(cp.block_number as i64)
            .bind(cp.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;

        debug!(count = checkpoints.len(), "checkpoints saved");
        Ok(())
    }

    async fn delete(&self, source_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use verifield_core::event::{DomainEvent, EventPayload};
    use verifield_core::projector::changeset;

    fn mint(token_id: u64, owner: &str, block: u64) -> DomainEvent {
        DomainEvent {
            token_id,
            block_number: block,
            log_index: 0,
            tx_hash: format!("0x{block:064x}"),
            payload: EventPayload::Minted { owner: owner.into() },
        }
    }

    fn purchase(token_id: u64, buyer: &str, amount: u64, block: u64) -> DomainEvent {
        DomainEvent {
            token_id,
            block_number: block,
            log_index: 1,
            tx_hash: format!("0x{block:064x}"),
            payload: EventPayload::Purchased {
                buyer: buyer.into(),
                amount: U256::from(amount),
            },
        }
    }

    async fn project(store: &SqliteStore, ev: &DomainEvent) -> Result<ApplyOutcome, IndexerError> {
        let existing = store.dataset(ev.token_id).await?;
        let cs = changeset(ev, existing.as_ref())?;
        store.apply(&cs).await
    }

    // ── CheckpointStore ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn checkpoint_roundtrip_and_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.read("0xasset").await.unwrap(), 0);

        store.write("0xasset", 100).await.unwrap();
        store.write("0xasset", 200).await.unwrap();

        let loaded = store.load("0xasset").await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 200);

        store.delete("0xasset").await.unwrap();
        assert!(store.load("0xasset").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_all_writes_every_source() {
        let store = SqliteStore::in_memory().await.unwrap();
        let cps: Vec<Checkpoint> = ["0xasset", "0xmarket"]
            .iter()
            .map(|s| Checkpoint {
                source_id: s.to_string(),
                block_number: 42,
                updated_at: 1_700_000_000,
            })
            .collect();
        store.save_all(&cps).await.unwrap();
        assert_eq!(store.read("0xasset").await.unwrap(), 42);
        assert_eq!(store.read("0xmarket").await.unwrap(), 42);
    }

    // ── Read model ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn mint_then_purchase() {
        let store = SqliteStore::in_memory().await.unwrap();
        project(&store, &mint(1, "0xa", 10)).await.unwrap();
        project(&store, &purchase(1, "0xb", 500, 50)).await.unwrap();

        let ds = store.dataset(1).await.unwrap().unwrap();
        assert_eq!(ds.owner, "0xb");
        assert_eq!(ds.buyers_count, 1);
        assert!(!ds.verified);
        assert_eq!(ds.name, "Dataset #1");

        let purchases = store.purchases_for(1).await.unwrap();
        assert_eq!(purchases.len(), 1);
        assert_eq!(purchases[0].amount, U256::from(500u64));
        assert_eq!(store.credit_balance("0xa").await.unwrap(), U256::from(500u64));
    }

    #[tokio::test]
    async fn replay_leaves_state_unchanged() {
        let store = SqliteStore::in_memory().await.unwrap();
        let events = [mint(1, "0xa", 10), purchase(1, "0xb", 500, 50)];
        for ev in &events {
            project(&store, ev).await.unwrap();
        }
        let before = store.counts().await.unwrap();

        for ev in &events {
            assert!(project(&store, ev).await.unwrap().is_replay());
        }
        assert_eq!(store.counts().await.unwrap(), before);
        assert_eq!(store.dataset(1).await.unwrap().unwrap().buyers_count, 1);
    }

    #[tokio::test]
    async fn large_amounts_survive_storage() {
        let store = SqliteStore::in_memory().await.unwrap();
        project(&store, &mint(1, "0xa", 10)).await.unwrap();
        let big = U256::from(u128::MAX) * U256::from(1_000u64);
        let mut ev = purchase(1, "0xb", 0, 50);
        ev.payload = EventPayload::Purchased { buyer: "0xb".into(), amount: big };
        project(&store, &ev).await.unwrap();
        assert_eq!(store.ledger_for("0xa").await.unwrap()[0].delta, big);
    }

    #[tokio::test]
    async fn verify_unknown_token_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        let ds = Dataset::minted(3, "0xa", 1);
        let ev = DomainEvent {
            token_id: 3,
            block_number: 7,
            log_index: 0,
            tx_hash: "0xv".into(),
            payload: EventPayload::Verified { verified: true },
        };
        let cs = changeset(&ev, Some(&ds)).unwrap();
        let err = store.apply(&cs).await.unwrap_err();
        assert!(matches!(err, IndexerError::Consistency { token_id: 3, .. }));
        assert_eq!(store.counts().await.unwrap().activity, 0);
    }

    #[tokio::test]
    async fn activity_and_recent_queries() {
        let store = SqliteStore::in_memory().await.unwrap();
        project(&store, &mint(1, "0xa", 10)).await.unwrap();
        project(&store, &mint(2, "0xa", 20)).await.unwrap();

        let recent = store.recent_datasets(5).await.unwrap();
        assert_eq!(recent.iter().map(|d| d.token_id).collect::<Vec<_>>(), vec![2, 1]);

        let feed = store.activity_for("0xA", 1).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].token_id, 2);
        assert_eq!(feed[0].activity_type, ActivityType::Mint);
        assert_eq!(store.ownership_history(1).await.unwrap().len(), 1);
    }
}
