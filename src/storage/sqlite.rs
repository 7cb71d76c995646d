use crate::error::StoreError;
use crate::storage::{EntryStore, Run, RunStore, SlotMetadata, StorageEntry};
use alloy::primitives::{Address, B256};
use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_DB_PATH: &str = "indexooor.db";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const MAX_LOCKED_ATTEMPTS: u32 = 6;

/// Explicit connection settings for [`IndexDb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_PATH)
    }
}

/// SQLite-backed run and storage-entry store.
///
/// Each operation opens its own connection, so the handle is cheap to clone
/// and safe to share.
#[derive(Debug, Clone)]
pub struct IndexDb {
    path: PathBuf,
    busy_timeout: Duration,
}

impl IndexDb {
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let db = Self {
            path: config.path.clone(),
            busy_timeout: config.busy_timeout,
        };
        db.ensure_schema()?;
        tracing::debug!("[DB] Opened {}", db.path.display());
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.with_connection("ensure_schema", |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    start_block INTEGER NOT NULL,
                    last_block INTEGER NOT NULL,
                    contracts TEXT NOT NULL,
                    created_at_ms INTEGER NOT NULL,
                    updated_at_ms INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS storage_entries (
                    slot TEXT NOT NULL,
                    contract TEXT NOT NULL,
                    value TEXT NOT NULL,
                    variable_name TEXT,
                    key TEXT,
                    deep_key TEXT,
                    struct_var TEXT,
                    block_number INTEGER NOT NULL,
                    updated_at_ms INTEGER NOT NULL,
                    PRIMARY KEY (slot, contract)
                );
                CREATE INDEX IF NOT EXISTS idx_storage_entries_contract
                    ON storage_entries (contract);
                "#,
            )
        })
    }

    /// Latest stored value for `(slot, contract)`.
    pub fn entry(&self, slot: B256, contract: Address) -> Result<Option<StorageEntry>, StoreError> {
        let slot_hex = format!("{slot:#x}");
        let contract_hex = format!("{contract:#x}");
        let raw = self.with_connection("entry", |conn| {
            conn.query_row(
                r#"
                SELECT slot, contract, value, block_number, variable_name, key, deep_key, struct_var
                FROM storage_entries
                WHERE slot = ?1 AND contract = ?2
                "#,
                params![slot_hex, contract_hex],
                RawEntry::from_row,
            )
            .optional()
        })?;
        raw.map(|row| row.decode("entry")).transpose()
    }

    /// Every stored entry of `contract`, ordered by slot.
    pub fn entries_for_contract(&self, contract: Address) -> Result<Vec<StorageEntry>, StoreError> {
        let contract_hex = format!("{contract:#x}");
        let rows = self.with_connection("entries_for_contract", |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT slot, contract, value, block_number, variable_name, key, deep_key, struct_var
                FROM storage_entries
                WHERE contract = ?1
                ORDER BY slot ASC
                "#,
            )?;
            let rows = stmt.query_map(params![contract_hex], RawEntry::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        rows.into_iter()
            .map(|row| row.decode("entries_for_contract"))
            .collect()
    }

    pub fn entry_count(&self) -> Result<u64, StoreError> {
        let count = self.with_connection("entry_count", |conn| {
            conn.query_row("SELECT COUNT(*) FROM storage_entries", [], |row| {
                row.get::<_, i64>(0)
            })
        })?;
        Ok(count.max(0) as u64)
    }

    fn with_connection<T, F>(&self, context: &str, op: F) -> Result<T, StoreError>
    where
        F: Fn(&Connection) -> rusqlite::Result<T>,
    {
        let mut last_err = String::new();

        for attempt in 1..=MAX_LOCKED_ATTEMPTS {
            let conn = Connection::open(&self.path).map_err(|e| StoreError::Sqlite {
                context: format!("open {}", self.path.display()),
                reason: e.to_string(),
            })?;
            conn.busy_timeout(self.busy_timeout)
                .map_err(|e| StoreError::Sqlite {
                    context: "configure busy timeout".to_string(),
                    reason: e.to_string(),
                })?;

            match op(&conn) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_err = err.to_string();
                    if is_sqlite_locked_error(&err) && attempt < MAX_LOCKED_ATTEMPTS {
                        tracing::debug!(
                            "[DB] {} hit a locked database (attempt {}/{}).",
                            context,
                            attempt,
                            MAX_LOCKED_ATTEMPTS
                        );
                        continue;
                    }
                    return Err(StoreError::Sqlite {
                        context: format!("{} on {}", context, self.path.display()),
                        reason: last_err,
                    });
                }
            }
        }

        Err(StoreError::Sqlite {
            context: format!(
                "{} on {} after {} attempt(s)",
                context,
                self.path.display(),
                MAX_LOCKED_ATTEMPTS
            ),
            reason: last_err,
        })
    }
}

impl RunStore for IndexDb {
    fn create_run(
        &self,
        start_block: u64,
        last_block: u64,
        contracts: &[Address],
    ) -> Result<i64, StoreError> {
        let contracts_csv = encode_contracts(contracts);
        let now = to_i64(now_ms());
        self.with_connection("create_run", |conn| {
            conn.execute(
                r#"
                INSERT INTO runs (start_block, last_block, contracts, created_at_ms, updated_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?4)
                "#,
                params![to_i64(start_block), to_i64(last_block), contracts_csv, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn update_run(&self, id: i64, last_block: u64) -> Result<usize, StoreError> {
        let now = to_i64(now_ms());
        self.with_connection("update_run", |conn| {
            conn.execute(
                "UPDATE runs SET last_block = ?1, updated_at_ms = ?2 WHERE id = ?3",
                params![to_i64(last_block), now, id],
            )
        })
    }

    fn fetch_run(&self, id: i64) -> Result<Option<Run>, StoreError> {
        let raw = self.with_connection("fetch_run", |conn| {
            conn.query_row(
                "SELECT id, start_block, last_block, contracts FROM runs WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
        })?;
        let Some((id, start_block, last_block, contracts_csv)) = raw else {
            return Ok(None);
        };
        let contracts = decode_contracts(&contracts_csv).map_err(|reason| StoreError::Corrupt {
            context: format!("fetch_run({id})"),
            reason,
        })?;
        Ok(Some(Run {
            id,
            start_block: from_i64(start_block),
            last_processed_block: from_i64(last_block),
            contracts,
        }))
    }
}

impl EntryStore for IndexDb {
    fn upsert_entry(&self, entry: &StorageEntry) -> Result<(), StoreError> {
        let slot_hex = format!("{:#x}", entry.slot);
        let contract_hex = format!("{:#x}", entry.contract);
        let value_hex = format!("{:#x}", entry.value);
        let now = to_i64(now_ms());
        self.with_connection("upsert_entry", |conn| {
            conn.execute(
                r#"
                INSERT INTO storage_entries
                    (slot, contract, value, variable_name, key, deep_key, struct_var, block_number, updated_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(slot, contract) DO UPDATE SET
                    value = excluded.value,
                    variable_name = excluded.variable_name,
                    key = excluded.key,
                    deep_key = excluded.deep_key,
                    struct_var = excluded.struct_var,
                    block_number = excluded.block_number,
                    updated_at_ms = excluded.updated_at_ms
                "#,
                params![
                    slot_hex,
                    contract_hex,
                    value_hex,
                    entry.metadata.variable_name,
                    entry.metadata.key,
                    entry.metadata.deep_key,
                    entry.metadata.struct_var,
                    to_i64(entry.block_number),
                    now
                ],
            )
        })
        .map(|_| ())
    }
}

struct RawEntry {
    slot: String,
    contract: String,
    value: String,
    block_number: i64,
    metadata: SlotMetadata,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            slot: row.get(0)?,
            contract: row.get(1)?,
            value: row.get(2)?,
            block_number: row.get(3)?,
            metadata: SlotMetadata {
                variable_name: row.get(4)?,
                key: row.get(5)?,
                deep_key: row.get(6)?,
                struct_var: row.get(7)?,
            },
        })
    }

    fn decode(self, context: &str) -> Result<StorageEntry, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            context: context.to_string(),
            reason,
        };
        Ok(StorageEntry {
            slot: B256::from_str(&self.slot).map_err(|e| corrupt(format!("slot {}: {e}", self.slot)))?,
            contract: Address::from_str(&self.contract)
                .map_err(|e| corrupt(format!("contract {}: {e}", self.contract)))?,
            value: B256::from_str(&self.value)
                .map_err(|e| corrupt(format!("value {}: {e}", self.value)))?,
            block_number: from_i64(self.block_number),
            metadata: self.metadata,
        })
    }
}

fn encode_contracts(contracts: &[Address]) -> String {
    contracts
        .iter()
        .map(|address| format!("{address:#x}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_contracts(raw: &str) -> Result<Vec<Address>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| Address::from_str(part).map_err(|e| format!("contract `{part}`: {e}")))
        .collect()
}

fn is_sqlite_locked_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            )
        }
        _ => false,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

fn to_i64(value: u64) -> i64 {
    if value > i64::MAX as u64 {
        i64::MAX
    } else {
        value as i64
    }
}

fn from_i64(value: i64) -> u64 {
    value.max(0) as u64
}
