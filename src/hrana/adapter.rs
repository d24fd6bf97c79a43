//! Database adapters (spec.md §1 "Out of scope": "we consume an abstract
//! `execute(sql, args) -> rows` contract"). The HRANA server is adapter
//! agnostic; this module defines that contract plus a reference
//! implementation backed by `libsql`, grounded on the teacher's
//! `turso.rs` connection-building machinery.

use async_trait::async_trait;

use super::error::AdapterError;
use super::value::Scalar;

/// One row, as a list of column name / value pairs in the order the
/// adapter produced them.
pub type AdapterRow = Vec<(String, Scalar)>;

/// The result of executing one statement.
#[derive(Debug, Clone, Default)]
pub struct AdapterResult {
    pub rows: Vec<AdapterRow>,
    pub rows_affected: u64,
    pub last_insert_rowid: Option<i64>,
}

/// The abstract `execute(sql, args) -> rows` contract spec.md calls
/// external. Adapters are resolved by `(adapter_type, namespace)` at
/// pipeline start (§4.4 "Adapter selection") and held for the life of one
/// pipeline.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    async fn execute(&self, sql: &str, args: &[Scalar]) -> Result<AdapterResult, AdapterError>;
}

/// Resolves adapter instances by type and, for tenant-scoped requests, by
/// namespace. Supplied by the embedding application; the core never
/// constructs adapters itself (§1 "Out of scope").
#[async_trait]
pub trait AdapterResolver: Send + Sync {
    /// `getAdapter(type, namespace)`.
    async fn get_adapter(
        &self,
        adapter_type: &str,
        namespace: &str,
    ) -> Result<std::sync::Arc<dyn DatabaseAdapter>, AdapterError>;

    /// `getRootAdapter(type)`.
    async fn get_root_adapter(&self, adapter_type: &str) -> Result<std::sync::Arc<dyn DatabaseAdapter>, AdapterError>;
}

#[cfg(feature = "libsql-adapter")]
pub mod libsql_adapter {
    //! Reference `DatabaseAdapter` backed by `libsql`, grounded on the
    //! teacher's local/remote/embedded-replica connection-building modes
    //! in `turso.rs`.

    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::super::error::AdapterError;
    use super::super::value::Scalar;
    use super::{AdapterResult, AdapterRow, DatabaseAdapter};

    #[derive(Debug, Clone)]
    pub enum LibsqlMode {
        Local { path: PathBuf },
        Remote { url: String, auth_token: String },
        EmbeddedReplica {
            path: PathBuf,
            url: String,
            auth_token: String,
            sync_interval: Option<Duration>,
        },
    }

    pub struct LibsqlAdapter {
        connection: libsql::Connection,
    }

    impl LibsqlAdapter {
        /// Build a connection with the same exponential-backoff retry
        /// policy the teacher's `create_database_with_retries` uses.
        pub async fn connect(mode: LibsqlMode, max_retries: u32, retry_delay: Duration) -> Result<Self, AdapterError> {
            let mut attempt = 0;
            loop {
                match Self::try_connect(&mode).await {
                    Ok(connection) => return Ok(Self { connection }),
                    Err(e) => {
                        attempt += 1;
                        if attempt > max_retries {
                            return Err(e);
                        }
                        let delay = retry_delay * 2_u32.pow(attempt.saturating_sub(1));
                        tracing::warn!(attempt, error = %e.message, "libsql connection attempt failed, retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        async fn try_connect(mode: &LibsqlMode) -> Result<libsql::Connection, AdapterError> {
            let db = match mode {
                LibsqlMode::Local { path } => libsql::Builder::new_local(path).build().await,
                LibsqlMode::Remote { url, auth_token } => {
                    libsql::Builder::new_remote(url.clone(), auth_token.clone()).build().await
                }
                LibsqlMode::EmbeddedReplica {
                    path,
                    url,
                    auth_token,
                    sync_interval,
                } => {
                    let mut builder = libsql::Builder::new_remote_replica(path.clone(), url.clone(), auth_token.clone());
                    if let Some(interval) = sync_interval {
                        builder = builder.sync_interval(*interval);
                    }
                    builder.build().await
                }
            }
            .map_err(|e| categorize_libsql_error(&e))?;

            db.connect().map_err(|e| categorize_libsql_error(&e))
        }
    }

    #[async_trait]
    impl DatabaseAdapter for LibsqlAdapter {
        async fn execute(&self, sql: &str, args: &[Scalar]) -> Result<AdapterResult, AdapterError> {
            let values: Vec<libsql::Value> = args.iter().map(scalar_to_libsql).collect();
            let mut rows = self
                .connection
                .query(sql, values)
                .await
                .map_err(|e| categorize_libsql_error(&e))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().await.map_err(|e| categorize_libsql_error(&e))? {
                let mut record: AdapterRow = Vec::new();
                for idx in 0..rows.column_count() {
                    let name = rows.column_name(idx).unwrap_or_default().to_string();
                    let value = row.get_value(idx).map_err(|e| categorize_libsql_error(&e))?;
                    record.push((name, libsql_to_scalar(value)));
                }
                out.push(record);
            }

            Ok(AdapterResult {
                rows: out,
                rows_affected: self.connection.changes(),
                last_insert_rowid: Some(self.connection.last_insert_rowid()),
            })
        }
    }

    fn scalar_to_libsql(value: &Scalar) -> libsql::Value {
        match value {
            Scalar::Null => libsql::Value::Null,
            Scalar::SafeInteger(n) => libsql::Value::Integer(*n as i64),
            Scalar::BigInteger(n) => libsql::Value::Integer(*n),
            Scalar::Float(f) => libsql::Value::Real(*f),
            Scalar::Text(s) => libsql::Value::Text(s.clone()),
            Scalar::Blob(bytes) => libsql::Value::Blob(bytes.clone()),
            Scalar::Bool(b) => libsql::Value::Integer(if *b { 1 } else { 0 }),
        }
    }

    fn libsql_to_scalar(value: libsql::Value) -> Scalar {
        match value {
            libsql::Value::Null => Scalar::Null,
            libsql::Value::Integer(n) => {
                if super::super::value::is_safe_integer(n) {
                    Scalar::SafeInteger(n as f64)
                } else {
                    Scalar::BigInteger(n)
                }
            }
            libsql::Value::Real(f) => Scalar::Float(f),
            libsql::Value::Text(s) => Scalar::Text(s),
            libsql::Value::Blob(b) => Scalar::Blob(b),
        }
    }

    /// Mirrors the teacher's `categorize_turso_error`: libsql's error type
    /// doesn't carry a stable numeric SQLite code, so we pass the message
    /// through untagged and let `hrana::error::map_error`'s rule 4
    /// substring inference normalize it.
    fn categorize_libsql_error(err: &libsql::Error) -> AdapterError {
        AdapterError::new(err.to_string())
    }

    /// Default [`AdapterResolver`] for the `"sqlite"` adapter type: one
    /// local libsql file per namespace, under a configured root directory.
    /// Connections are opened lazily and cached for the life of the
    /// process.
    pub struct FileResolver {
        root: PathBuf,
        connections: dashmap::DashMap<String, std::sync::Arc<LibsqlAdapter>>,
    }

    impl FileResolver {
        pub fn new(root: PathBuf) -> Self {
            Self {
                root,
                connections: dashmap::DashMap::new(),
            }
        }

        async fn adapter_for(&self, key: &str) -> Result<std::sync::Arc<LibsqlAdapter>, AdapterError> {
            if let Some(existing) = self.connections.get(key) {
                return Ok(existing.clone());
            }
            let path = self.root.join(key).join("hrana.db");
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AdapterError::new(format!("failed to create database directory: {e}")))?;
            }
            let adapter = std::sync::Arc::new(
                LibsqlAdapter::connect(LibsqlMode::Local { path }, 3, Duration::from_millis(100)).await?,
            );
            self.connections.insert(key.to_string(), adapter.clone());
            Ok(adapter)
        }
    }

    #[async_trait]
    impl super::AdapterResolver for FileResolver {
        async fn get_adapter(
            &self,
            adapter_type: &str,
            namespace: &str,
        ) -> Result<std::sync::Arc<dyn DatabaseAdapter>, AdapterError> {
            if adapter_type != "sqlite" {
                return Err(AdapterError::new(format!("unsupported adapter type '{adapter_type}'")));
            }
            Ok(self.adapter_for(namespace).await? as std::sync::Arc<dyn DatabaseAdapter>)
        }

        async fn get_root_adapter(&self, adapter_type: &str) -> Result<std::sync::Arc<dyn DatabaseAdapter>, AdapterError> {
            if adapter_type != "sqlite" {
                return Err(AdapterError::new(format!("unsupported adapter type '{adapter_type}'")));
            }
            Ok(self.adapter_for("_root").await? as std::sync::Arc<dyn DatabaseAdapter>)
        }
    }
}
