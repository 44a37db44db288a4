//! The persistent single-file backend: one SQLite database holding one
//! `records` table. Durability aside, it must behave exactly like the
//! in-memory backend; the shared conformance suite holds both to that.

use std::{
    fmt,
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use common::backend::{
    record_not_found,
    Backend,
    Filter,
    Ordering,
    Record,
    RecordRef,
};
use parking_lot::Mutex;
use rusqlite::{
    params,
    Connection,
    OptionalExtension,
};
use serde_json::Value as JsonValue;

// We only have a single SQLite connection which does not allow async calls,
// so we can't really make queries concurrent.
pub struct SqliteBackend {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

struct Inner {
    newly_created: bool,
    connection: Connection,
}

impl SqliteBackend {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let newly_created = !path.as_ref().exists();
        let connection = Connection::open(path)?;
        // Execute create table unconditionally since it is idempotent.
        connection.execute_batch(RECORDS_INIT)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                newly_created,
                connection,
            })),
        })
    }

    /// Whether the database file was created by this handle.
    pub fn is_fresh(&self) -> bool {
        self.inner.lock().newly_created
    }

    // Loads every record in rowid (insertion) order. Predicates and
    // orderings are evaluated in Rust with the shared helpers so their
    // semantics are byte-for-byte those of the in-memory backend.
    fn load_all(&self) -> anyhow::Result<Vec<Record>> {
        let inner = self.inner.lock();
        let mut stmt = inner.connection.prepare(LIST_RECORDS)?;
        let rows = stmt.query_map([], |row| {
            let record_ref: String = row.get(0)?;
            let data: String = row.get(1)?;
            Ok((record_ref, data))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (record_ref, data) = row?;
            records.push(Record {
                record_ref: RecordRef::from(record_ref),
                data: serde_json::from_str::<JsonValue>(&data)?,
            });
        }
        Ok(records)
    }

    fn get_inner(&self, record_ref: &RecordRef) -> anyhow::Result<Option<Record>> {
        let inner = self.inner.lock();
        let mut stmt = inner.connection.prepare_cached(GET_RECORD)?;
        let data: Option<String> = stmt
            .query_row(params![record_ref.as_str()], |row| row.get(0))
            .optional()?;
        data.map(|data| {
            Ok(Record {
                record_ref: record_ref.clone(),
                data: serde_json::from_str::<JsonValue>(&data)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn get(&self, record_ref: &RecordRef) -> anyhow::Result<Record> {
        self.get_inner(record_ref)?
            .ok_or_else(|| record_not_found(record_ref).into())
    }

    async fn create(&self, data: JsonValue) -> anyhow::Result<Record> {
        let record_ref = RecordRef::of(&data)?;
        let serialized = serde_json::to_string(&data)?;
        let inner = self.inner.lock();
        let mut stmt = inner.connection.prepare_cached(INSERT_RECORD)?;
        // Content-addressed, so a ref collision is the same payload and the
        // insert can be skipped.
        stmt.execute(params![record_ref.as_str(), serialized])?;
        Ok(Record { record_ref, data })
    }

    async fn bulk_read(&self, refs: &[RecordRef]) -> anyhow::Result<Vec<Record>> {
        refs.iter()
            .map(|record_ref| {
                self.get_inner(record_ref)?
                    .ok_or_else(|| record_not_found(record_ref).into())
            })
            .collect()
    }

    async fn query(
        &self,
        filters: Vec<Filter>,
        order: Option<Ordering>,
    ) -> anyhow::Result<Vec<Record>> {
        let mut results: Vec<Record> = self
            .load_all()?
            .into_iter()
            .filter(|record| filters.iter().all(|filter| filter.matches(record)))
            .collect();
        if let Some(order) = order {
            order.sort(&mut results);
        }
        Ok(results)
    }

    async fn list(&self, order: Option<Ordering>) -> anyhow::Result<Vec<Record>> {
        self.query(vec![], order).await
    }

    async fn keys(&self) -> anyhow::Result<Vec<RecordRef>> {
        let inner = self.inner.lock();
        let mut stmt = inner.connection.prepare(LIST_KEYS)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut refs = Vec::new();
        for row in rows {
            refs.push(RecordRef::from(row?));
        }
        Ok(refs)
    }

    async fn delete(&self, record_ref: &RecordRef) -> anyhow::Result<()> {
        let inner = self.inner.lock();
        let mut stmt = inner.connection.prepare_cached(DELETE_RECORD)?;
        let deleted = stmt.execute(params![record_ref.as_str()])?;
        if deleted == 0 {
            return Err(record_not_found(record_ref).into());
        }
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let inner = self.inner.lock();
        inner.connection.execute(CLEAR_RECORDS, [])?;
        Ok(())
    }
}

const RECORDS_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    ref TEXT NOT NULL,
    data TEXT NOT NULL,

    PRIMARY KEY (ref)
);
"#;

const GET_RECORD: &str = "SELECT data FROM records WHERE ref = ?";
const INSERT_RECORD: &str = "INSERT OR IGNORE INTO records (ref, data) VALUES (?, ?)";
const LIST_RECORDS: &str = "SELECT ref, data FROM records ORDER BY rowid ASC";
const LIST_KEYS: &str = "SELECT ref FROM records ORDER BY rowid ASC";
const DELETE_RECORD: &str = "DELETE FROM records WHERE ref = ?";
const CLEAR_RECORDS: &str = "DELETE FROM records";

