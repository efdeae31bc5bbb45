//! Database dump and restore.

use crate::models::backup::{DatabaseKind, DatabaseSpec};
use crate::services::process::run_checked;
use crate::utils::fs::copy_file_preserving;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Operations the backup engine needs for databases.
#[async_trait]
pub trait DatabaseControl: Send + Sync {
    /// Write a dump of `spec` to `dest`.
    async fn dump(&self, spec: &DatabaseSpec, dest: &Path) -> Result<()>;
    /// Replace the live database with the dump at `src`.
    async fn restore(&self, spec: &DatabaseSpec, src: &Path) -> Result<()>;
}

/// `pg_dump`/`psql` for Postgres, plain file copies for SQLite.
#[derive(Debug, Clone)]
pub struct DatabaseTools {
    postgres_user: String,
    timeout: Duration,
}

impl DatabaseTools {
    pub fn new(postgres_user: impl Into<String>, timeout: Duration) -> Self {
        Self {
            postgres_user: postgres_user.into(),
            timeout,
        }
    }

    fn sqlite_path<'a>(spec: &'a DatabaseSpec) -> Result<&'a Path> {
        spec.path
            .as_deref()
            .ok_or_else(|| crate::Error::other(format!("SQLite database {} has no path", spec.name)))
    }
}

impl Default for DatabaseTools {
    fn default() -> Self {
        Self::new("postgres", Duration::from_secs(300))
    }
}

#[async_trait]
impl DatabaseControl for DatabaseTools {
    async fn dump(&self, spec: &DatabaseSpec, dest: &Path) -> Result<()> {
        match spec.kind {
            DatabaseKind::Postgres => {
                let dest = dest.to_string_lossy().to_string();
                run_checked(
                    "pg_dump",
                    &["-U", self.postgres_user.as_str(), "-f", dest.as_str(), spec.name.as_str()],
                    self.timeout,
                )
                .await?;
            }
            DatabaseKind::Sqlite => {
                let path = Self::sqlite_path(spec)?;
                if !path.exists() {
                    return Err(crate::Error::PathNotFound(path.display().to_string()));
                }
                copy_file_preserving(path, dest)?;
            }
        }
        tracing::debug!("Dumped {} to {:?}", spec, dest);
        Ok(())
    }

    async fn restore(&self, spec: &DatabaseSpec, src: &Path) -> Result<()> {
        match spec.kind {
            DatabaseKind::Postgres => {
                let user = self.postgres_user.as_str();
                let name = spec.name.as_str();
                let src = src.to_string_lossy().to_string();
                run_checked("dropdb", &["-U", user, "--if-exists", name], self.timeout).await?;
                run_checked("createdb", &["-U", user, name], self.timeout).await?;
                run_checked(
                    "psql",
                    &["-U", user, "-q", "-v", "ON_ERROR_STOP=1", "-d", name, "-f", src.as_str()],
                    self.timeout,
                )
                .await?;
            }
            DatabaseKind::Sqlite => {
                copy_file_preserving(src, Self::sqlite_path(spec)?)?;
            }
        }
        tracing::info!("Restored database {}", spec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_dump_and_restore() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = temp_dir.path().join("app.db");
        std::fs::write(&db, b"original").unwrap();
        let spec = DatabaseSpec::sqlite(&db);
        let dump = temp_dir.path().join("dump/db_0.sqlite");

        let tools = DatabaseTools::default();
        tools.dump(&spec, &dump).await.unwrap();
        std::fs::write(&db, b"changed").unwrap();
        tools.restore(&spec, &dump).await.unwrap();

        assert_eq!(std::fs::read(&db).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_sqlite_dump_missing_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let spec = DatabaseSpec::sqlite(temp_dir.path().join("missing.db"));
        let result = DatabaseTools::default()
            .dump(&spec, &temp_dir.path().join("out.sqlite"))
            .await;
        assert!(result.is_err());
    }
}
