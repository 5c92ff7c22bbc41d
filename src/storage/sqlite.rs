use crate::fingerprint::Fingerprint;
use crate::models::VisitorRecord;
use crate::storage::{ActivityCounts, Ledger, LedgerError, LedgerResult};
use crate::threshold::Threshold;
use async_trait::async_trait;
use base64::prelude::*;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error};

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Takes the file's write lock up front, so other processes wait on
/// `BUSY_TIMEOUT` instead of failing mid-transaction
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// Ledger backed by a single SQLite file, one table per bucket
pub struct SqliteLedger {
    pool: SqlitePool,
    bucket: String,
    /// Serializes every mutating transaction
    write_lock: Mutex<()>,
    put_sql: String,
    get_sql: String,
    scan_sql: String,
    delete_sql: String,
    len_sql: String,
}

impl SqliteLedger {
    /// Open (or create) the ledger file at `path` and make sure `bucket` exists
    pub async fn open(path: impl AsRef<Path>, bucket: &str) -> LedgerResult<Self> {
        validate_bucket(bucket)?;

        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{bucket}" (
                fingerprint BLOB PRIMARY KEY NOT NULL,
                record BLOB NOT NULL
            ) WITHOUT ROWID
            "#
        ))
        .execute(&pool)
        .await?;

        debug!("Opened ledger bucket '{}' at {}", bucket, path.as_ref().display());

        Ok(Self {
            pool,
            bucket: bucket.to_string(),
            write_lock: Mutex::new(()),
            put_sql: format!(
                r#"
                INSERT INTO "{bucket}" (fingerprint, record)
                VALUES (?, ?)
                ON CONFLICT(fingerprint) DO UPDATE SET record = excluded.record
                "#
            ),
            get_sql: format!(r#"SELECT record FROM "{bucket}" WHERE fingerprint = ?"#),
            scan_sql: format!(r#"SELECT fingerprint, record FROM "{bucket}""#),
            delete_sql: format!(r#"DELETE FROM "{bucket}" WHERE fingerprint = ?"#),
            len_sql: format!(r#"SELECT COUNT(*) FROM "{bucket}""#),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn put(&self, fingerprint: &Fingerprint, record: &VisitorRecord) -> LedgerResult<()> {
        let value = record.encode();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        sqlx::query(&self.put_sql)
            .bind(&fingerprint.as_bytes()[..])
            .bind(&value[..])
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, fingerprint: &Fingerprint) -> LedgerResult<Option<VisitorRecord>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(&self.get_sql)
            .bind(&fingerprint.as_bytes()[..])
            .fetch_optional(&self.pool)
            .await?;

        value
            .map(|bytes| decode_record(fingerprint.as_bytes(), &bytes))
            .transpose()
    }

    async fn count_and_evict(
        &self,
        threshold: &Threshold,
        now: i64,
    ) -> LedgerResult<ActivityCounts> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let mut counts = ActivityCounts::default();
        let mut stale: Vec<Vec<u8>> = Vec::new();

        {
            // SQLite cannot delete under a live cursor, so stale keys are
            // collected here and removed below, still inside `tx`.
            let mut rows =
                sqlx::query_as::<_, (Vec<u8>, Vec<u8>)>(&self.scan_sql).fetch(&mut *tx);

            while let Some((key, value)) = rows.try_next().await? {
                let record = decode_record(&key, &value)?;
                if threshold.is_active(record.last_visit, now) {
                    counts.add_active(record.country.as_ref());
                } else {
                    stale.push(key);
                }
            }
        }

        for key in &stale {
            sqlx::query(&self.delete_sql)
                .bind(key.as_slice())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        counts.evicted = stale.len() as u64;
        Ok(counts)
    }

    async fn len(&self) -> LedgerResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(&self.len_sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("Closed ledger bucket '{}'", self.bucket);
    }
}

/// Bucket names end up inside SQL, so only plain identifiers are allowed
fn validate_bucket(bucket: &str) -> LedgerResult<()> {
    let mut chars = bucket.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(LedgerError::InvalidBucket(bucket.to_string()))
    }
}

fn decode_record(key: &[u8], value: &[u8]) -> LedgerResult<VisitorRecord> {
    VisitorRecord::try_from(value).map_err(|source| {
        let key = BASE64_URL_SAFE_NO_PAD.encode(key);
        error!("Corrupt visitor record under key {}: {}", key, source);
        LedgerError::Corrupt { key, source }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_validation() {
        assert!(validate_bucket("ipcount").is_ok());
        assert!(validate_bucket("_visitors_2").is_ok());
        assert!(validate_bucket("").is_err());
        assert!(validate_bucket("2fast").is_err());
        assert!(validate_bucket("a\"; DROP TABLE x; --").is_err());
        assert!(validate_bucket("with space").is_err());
    }
}
