//! SQLite-backed metadata store.
//!
//! The relational variant addresses data by structured columns instead of
//! path strings. Scopes become SQL predicates over `service`, `region` and
//! `resource_type`; region and type columns hold the same segment values the
//! path layout uses (`global`, `_`), so scope matching is identical across
//! stores.
//!
//! Index compare-and-swap is a single statement: an `INSERT ... ON CONFLICT
//! DO NOTHING` while the index is absent, or an `UPDATE ... WHERE fingerprint
//! = ?` afterwards. The write applied iff exactly one row changed.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use cirrus_core::paths::{region_segment, type_segment, validate_segment};
use cirrus_core::{Arn, Error, Fingerprint, ResourceTypeParts, Result};

use crate::metadata::{is_empty_value, IndexSnapshot, MetadataStore, METADATA_ASPECT};

/// Schema statements, applied idempotently on open.
pub(crate) const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS resource_metadata (
        partition TEXT NOT NULL,
        account TEXT NOT NULL,
        service TEXT NOT NULL,
        region TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        arn TEXT NOT NULL,
        aspect TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (partition, account, arn, aspect)
    )",
    "CREATE INDEX IF NOT EXISTS idx_resource_metadata_scope
        ON resource_metadata (partition, service, region, resource_type)",
    "CREATE TABLE IF NOT EXISTS account_metadata (
        partition TEXT NOT NULL,
        account TEXT NOT NULL,
        aspect TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (partition, account, aspect)
    )",
    "CREATE TABLE IF NOT EXISTS organization_metadata (
        partition TEXT NOT NULL,
        org_id TEXT NOT NULL,
        aspect TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (partition, org_id, aspect)
    )",
    "CREATE TABLE IF NOT EXISTS organization_policies (
        partition TEXT NOT NULL,
        org_id TEXT NOT NULL,
        policy_type TEXT NOT NULL,
        policy_id TEXT NOT NULL,
        aspect TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (partition, org_id, policy_type, policy_id, aspect)
    )",
    "CREATE TABLE IF NOT EXISTS ram_resources (
        partition TEXT NOT NULL,
        account TEXT NOT NULL,
        region TEXT NOT NULL,
        arn TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (partition, account, arn)
    )",
    "CREATE TABLE IF NOT EXISTS indexes (
        partition TEXT NOT NULL,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        PRIMARY KEY (partition, name)
    )",
];

/// Tables and columns copied by a merge, in primary-key-compatible form.
pub(crate) const TABLES: &[(&str, &str)] = &[
    (
        "resource_metadata",
        "partition, account, service, region, resource_type, arn, aspect, value",
    ),
    ("account_metadata", "partition, account, aspect, value"),
    ("organization_metadata", "partition, org_id, aspect, value"),
    (
        "organization_policies",
        "partition, org_id, policy_type, policy_id, aspect, value",
    ),
    ("ram_resources", "partition, account, region, arn, value"),
    ("indexes", "partition, name, value, fingerprint"),
];

pub(crate) fn db_error(op: &str, err: sqlx::Error) -> Error {
    Error::storage_with_source(format!("sqlite {op}"), err)
}

/// Opens (creating if missing) a database file and applies the schema.
pub(crate) async fn connect(path: &Path, max_connections: u32) -> Result<Pool<Sqlite>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::storage_with_source(format!("create {}", parent.display()), e))?;
    }

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        // Prevent transient "database is locked" errors under concurrent access.
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await
        .map_err(|e| db_error("open", e))?;
    apply_schema(&pool).await?;
    Ok(pool)
}

async fn apply_schema(pool: &Pool<Sqlite>) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| db_error("migrate", e))?;
    }
    Ok(())
}

fn to_text(value: &Value) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::serialization("encode value", &e))
}

fn from_text(context: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| Error::serialization(context, &e))
}

/// [`MetadataStore`] persisted in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    pool: Pool<Sqlite>,
    partition: String,
}

impl SqliteMetadataStore {
    /// Opens the database at `path`, creating it and its schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition is invalid or the database cannot
    /// be opened.
    pub async fn open(path: impl AsRef<Path>, partition: impl Into<String>) -> Result<Self> {
        let partition = partition.into();
        validate_segment(&partition, "partition")?;
        // SQLite permits one writer at a time; a small pool keeps readers
        // concurrent without contending on the write lock.
        let pool = connect(path.as_ref(), 4).await?;
        Ok(Self { pool, partition })
    }

    /// Creates a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition is invalid or SQLite fails to start.
    pub async fn in_memory(partition: impl Into<String>) -> Result<Self> {
        let partition = partition.into();
        validate_segment(&partition, "partition")?;
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| db_error("open", e))?;
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| db_error("open", e))?;
        apply_schema(&pool).await?;
        Ok(Self { pool, partition })
    }

    /// Returns the connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn upsert_account_like(
        &self,
        sql_upsert: &str,
        sql_delete: &str,
        keys: &[&str],
        value: &Value,
    ) -> Result<()> {
        if is_empty_value(value) {
            let mut query = sqlx::query(sql_delete).bind(&self.partition);
            for key in keys {
                query = query.bind(*key);
            }
            query.execute(&self.pool).await.map_err(|e| db_error("delete", e))?;
            return Ok(());
        }
        let mut query = sqlx::query(sql_upsert).bind(&self.partition);
        for key in keys {
            query = query.bind(*key);
        }
        query
            .bind(to_text(value)?)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("upsert", e))?;
        Ok(())
    }

    async fn fetch_value(&self, sql: &str, keys: &[&str]) -> Result<Option<Value>> {
        let mut query = sqlx::query_scalar::<_, String>(sql).bind(&self.partition);
        for key in keys {
            query = query.bind(*key);
        }
        let text = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("select", e))?;
        text.map(|t| from_text("parse stored value", &t)).transpose()
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    fn partition(&self) -> &str {
        &self.partition
    }

    async fn save_resource_metadata(
        &self,
        account: &str,
        arn: &Arn,
        aspect: &str,
        value: &Value,
    ) -> Result<()> {
        validate_segment(account, "account")?;
        validate_segment(aspect, "aspect")?;
        validate_segment(region_segment(arn.region()), "region")?;
        if is_empty_value(value) {
            sqlx::query(
                "DELETE FROM resource_metadata
                 WHERE partition = ? AND account = ? AND arn = ? AND aspect = ?",
            )
            .bind(&self.partition)
            .bind(account)
            .bind(arn.as_str())
            .bind(aspect)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete resource aspect", e))?;
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO resource_metadata
                (partition, account, service, region, resource_type, arn, aspect, value)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (partition, account, arn, aspect) DO UPDATE SET value = excluded.value",
        )
        .bind(&self.partition)
        .bind(account)
        .bind(arn.service())
        .bind(region_segment(arn.region()))
        .bind(type_segment(arn.resource_type()))
        .bind(arn.as_str())
        .bind(aspect)
        .bind(to_text(value)?)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("upsert resource aspect", e))?;
        Ok(())
    }

    async fn get_resource_metadata(
        &self,
        account: &str,
        arn: &Arn,
        aspect: &str,
    ) -> Result<Option<Value>> {
        self.fetch_value(
            "SELECT value FROM resource_metadata
             WHERE partition = ? AND account = ? AND arn = ? AND aspect = ?",
            &[account, arn.as_str(), aspect],
        )
        .await
    }

    async fn delete_resource_metadata(&self, account: &str, arn: &Arn) -> Result<()> {
        sqlx::query("DELETE FROM resource_metadata WHERE partition = ? AND account = ? AND arn = ?")
            .bind(&self.partition)
            .bind(account)
            .bind(arn.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete resource", e))?;
        Ok(())
    }

    async fn list_resources(&self, account: &str, scope: &ResourceTypeParts) -> Result<Vec<Arn>> {
        let region = scope.region_segment();
        let resource_type = scope.type_segment();
        // One row per resource, carrying its `metadata` aspect when present.
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT arn, MAX(CASE WHEN aspect = ? THEN value END)
             FROM resource_metadata
             WHERE partition = ? AND account = ? AND service = ?
               AND (? IS NULL OR region = ?)
               AND (? IS NULL OR resource_type = ?)
             GROUP BY arn
             ORDER BY MIN(region), MIN(resource_type), arn",
        )
        .bind(METADATA_ASPECT)
        .bind(&self.partition)
        .bind(account)
        .bind(&scope.service)
        .bind(region)
        .bind(region)
        .bind(resource_type)
        .bind(resource_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list resources", e))?;

        let mut arns = Vec::with_capacity(rows.len());
        for (raw, metadata) in rows {
            if !scope.metadata.is_empty() {
                let Some(text) = metadata else { continue };
                if !scope.matches_metadata(&from_text("parse resource metadata", &text)?) {
                    continue;
                }
            }
            arns.push(Arn::parse(&raw)?);
        }
        Ok(arns)
    }

    async fn find_resource_metadata(
        &self,
        account: Option<&str>,
        scope: &ResourceTypeParts,
    ) -> Result<Vec<Value>> {
        let account = account.or(scope.account.as_deref());
        let region = scope.region_segment();
        let resource_type = scope.type_segment();
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT value FROM resource_metadata
             WHERE partition = ? AND aspect = ? AND service = ?
               AND (? IS NULL OR account = ?)
               AND (? IS NULL OR region = ?)
               AND (? IS NULL OR resource_type = ?)
             ORDER BY account, region, resource_type, arn",
        )
        .bind(&self.partition)
        .bind(METADATA_ASPECT)
        .bind(&scope.service)
        .bind(account)
        .bind(account)
        .bind(region)
        .bind(region)
        .bind(resource_type)
        .bind(resource_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("find resource metadata", e))?;

        let mut found = Vec::with_capacity(rows.len());
        for text in rows {
            let value = from_text("parse resource metadata", &text)?;
            if scope.matches_metadata(&value) {
                found.push(value);
            }
        }
        Ok(found)
    }

    async fn get_index(&self, name: &str, default: Value) -> Result<IndexSnapshot<Value>> {
        validate_segment(name, "index name")?;
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT value, fingerprint FROM indexes WHERE partition = ? AND name = ?",
        )
        .bind(&self.partition)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("read index", e))?;

        match row {
            Some((value, fingerprint)) => Ok(IndexSnapshot {
                data: from_text(&format!("parse index {name}"), &value)?,
                lock_id: Some(fingerprint.parse()?),
            }),
            None => Ok(IndexSnapshot {
                data: default,
                lock_id: None,
            }),
        }
    }

    async fn save_index(
        &self,
        name: &str,
        data: &Value,
        lock_id: Option<&Fingerprint>,
    ) -> Result<bool> {
        validate_segment(name, "index name")?;
        let text = to_text(data)?;
        let fingerprint = Fingerprint::of(text.as_bytes()).to_hex();

        let result = match lock_id {
            None => sqlx::query(
                "INSERT INTO indexes (partition, name, value, fingerprint) VALUES (?, ?, ?, ?)
                 ON CONFLICT (partition, name) DO NOTHING",
            )
            .bind(&self.partition)
            .bind(name)
            .bind(&text)
            .bind(&fingerprint)
            .execute(&self.pool)
            .await,
            Some(expected) => sqlx::query(
                "UPDATE indexes SET value = ?, fingerprint = ?
                 WHERE partition = ? AND name = ? AND fingerprint = ?",
            )
            .bind(&text)
            .bind(&fingerprint)
            .bind(&self.partition)
            .bind(name)
            .bind(expected.to_hex())
            .execute(&self.pool)
            .await,
        }
        .map_err(|e| db_error("save index", e))?;

        let saved = result.rows_affected() == 1;
        if !saved {
            debug!(index = name, "index changed since it was read");
        }
        Ok(saved)
    }

    async fn list_account_ids(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT account FROM account_metadata WHERE partition = ?1
             UNION SELECT account FROM resource_metadata WHERE partition = ?1
             UNION SELECT account FROM ram_resources WHERE partition = ?1
             ORDER BY 1",
        )
        .bind(&self.partition)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list accounts", e))
    }

    async fn save_account_metadata(&self, account: &str, aspect: &str, value: &Value) -> Result<()> {
        validate_segment(account, "account")?;
        validate_segment(aspect, "aspect")?;
        self.upsert_account_like(
            "INSERT INTO account_metadata (partition, account, aspect, value) VALUES (?, ?, ?, ?)
             ON CONFLICT (partition, account, aspect) DO UPDATE SET value = excluded.value",
            "DELETE FROM account_metadata WHERE partition = ? AND account = ? AND aspect = ?",
            &[account, aspect],
            value,
        )
        .await
    }

    async fn get_account_metadata(&self, account: &str, aspect: &str) -> Result<Option<Value>> {
        self.fetch_value(
            "SELECT value FROM account_metadata WHERE partition = ? AND account = ? AND aspect = ?",
            &[account, aspect],
        )
        .await
    }

    async fn delete_account_metadata(&self, account: &str, aspect: &str) -> Result<()> {
        self.save_account_metadata(account, aspect, &Value::Null).await
    }

    async fn save_organization_metadata(&self, org: &str, aspect: &str, value: &Value) -> Result<()> {
        validate_segment(org, "organization")?;
        validate_segment(aspect, "aspect")?;
        self.upsert_account_like(
            "INSERT INTO organization_metadata (partition, org_id, aspect, value) VALUES (?, ?, ?, ?)
             ON CONFLICT (partition, org_id, aspect) DO UPDATE SET value = excluded.value",
            "DELETE FROM organization_metadata WHERE partition = ? AND org_id = ? AND aspect = ?",
            &[org, aspect],
            value,
        )
        .await
    }

    async fn get_organization_metadata(&self, org: &str, aspect: &str) -> Result<Option<Value>> {
        self.fetch_value(
            "SELECT value FROM organization_metadata WHERE partition = ? AND org_id = ? AND aspect = ?",
            &[org, aspect],
        )
        .await
    }

    async fn save_organization_policy_metadata(
        &self,
        org: &str,
        policy_type: &str,
        policy_id: &str,
        aspect: &str,
        value: &Value,
    ) -> Result<()> {
        validate_segment(org, "organization")?;
        validate_segment(policy_type, "policy type")?;
        validate_segment(policy_id, "policy id")?;
        validate_segment(aspect, "aspect")?;
        self.upsert_account_like(
            "INSERT INTO organization_policies
                (partition, org_id, policy_type, policy_id, aspect, value) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (partition, org_id, policy_type, policy_id, aspect)
             DO UPDATE SET value = excluded.value",
            "DELETE FROM organization_policies
             WHERE partition = ? AND org_id = ? AND policy_type = ? AND policy_id = ? AND aspect = ?",
            &[org, policy_type, policy_id, aspect],
            value,
        )
        .await
    }

    async fn get_organization_policy_metadata(
        &self,
        org: &str,
        policy_type: &str,
        policy_id: &str,
        aspect: &str,
    ) -> Result<Option<Value>> {
        self.fetch_value(
            "SELECT value FROM organization_policies
             WHERE partition = ? AND org_id = ? AND policy_type = ? AND policy_id = ? AND aspect = ?",
            &[org, policy_type, policy_id, aspect],
        )
        .await
    }

    async fn list_organization_policies(&self, org: &str, policy_type: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT policy_id FROM organization_policies
             WHERE partition = ? AND org_id = ? AND policy_type = ?
             ORDER BY policy_id",
        )
        .bind(&self.partition)
        .bind(org)
        .bind(policy_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list organization policies", e))
    }

    async fn sync_organization_policies(
        &self,
        org: &str,
        policy_type: &str,
        current: &[String],
    ) -> Result<usize> {
        let mut removed = 0;
        for id in self.list_organization_policies(org, policy_type).await? {
            if current.contains(&id) {
                continue;
            }
            sqlx::query(
                "DELETE FROM organization_policies
                 WHERE partition = ? AND org_id = ? AND policy_type = ? AND policy_id = ?",
            )
            .bind(&self.partition)
            .bind(org)
            .bind(policy_type)
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete organization policy", e))?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn save_ram_resource(&self, account: &str, arn: &Arn, value: &Value) -> Result<()> {
        validate_segment(account, "account")?;
        if is_empty_value(value) {
            sqlx::query("DELETE FROM ram_resources WHERE partition = ? AND account = ? AND arn = ?")
                .bind(&self.partition)
                .bind(account)
                .bind(arn.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("delete RAM resource", e))?;
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO ram_resources (partition, account, region, arn, value) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (partition, account, arn) DO UPDATE SET value = excluded.value",
        )
        .bind(&self.partition)
        .bind(account)
        .bind(region_segment(arn.region()))
        .bind(arn.as_str())
        .bind(to_text(value)?)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("upsert RAM resource", e))?;
        Ok(())
    }

    async fn get_ram_resource(&self, account: &str, arn: &Arn) -> Result<Option<Value>> {
        self.fetch_value(
            "SELECT value FROM ram_resources WHERE partition = ? AND account = ? AND arn = ?",
            &[account, arn.as_str()],
        )
        .await
    }

    async fn sync_ram_resources(&self, account: &str, region: &str, current: &[Arn]) -> Result<usize> {
        let stored: Vec<String> = sqlx::query_scalar(
            "SELECT arn FROM ram_resources WHERE partition = ? AND account = ? AND region = ?",
        )
        .bind(&self.partition)
        .bind(account)
        .bind(region_segment(region))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list RAM resources", e))?;

        let mut removed = 0;
        for arn in stored {
            if current.iter().any(|c| c.as_str() == arn) {
                continue;
            }
            sqlx::query("DELETE FROM ram_resources WHERE partition = ? AND account = ? AND arn = ?")
                .bind(&self.partition)
                .bind(account)
                .bind(&arn)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("delete RAM resource", e))?;
            removed += 1;
        }
        Ok(removed)
    }
}
