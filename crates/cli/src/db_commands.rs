use std::path::{Path, PathBuf};

use {clap::Subcommand, racefeed_config::RacefeedConfig};

use crate::app::sqlite_file;

#[derive(Subcommand)]
pub enum DbAction {
    /// Delete the sync database file and its WAL/SHM companions.
    Reset,
    /// Run all pending database migrations.
    Migrate,
}

pub async fn handle_db(action: DbAction, config: &RacefeedConfig) -> anyhow::Result<()> {
    match action {
        DbAction::Reset => reset_database(&config.database.url),
        DbAction::Migrate => run_migrations(&config.database.url).await,
    }
}

/// The database file plus the `-wal` and `-shm` files SQLite may create.
fn database_files(db: &Path) -> Vec<PathBuf> {
    ["", "-wal", "-shm"]
        .iter()
        .map(|suffix| {
            let mut name = db.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        })
        .collect()
}

fn reset_database(url: &str) -> anyhow::Result<()> {
    let Some(db) = sqlite_file(url) else {
        anyhow::bail!("{url} is not a file-backed SQLite database");
    };

    let mut deleted = false;
    for path in database_files(&db) {
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("Deleted: {}", path.display());
            deleted = true;
        }
    }

    if deleted {
        println!("Database files deleted. Run `racefeed db migrate` to recreate them.");
    } else {
        println!("No database files found.");
    }
    Ok(())
}

async fn run_migrations(url: &str) -> anyhow::Result<()> {
    if let Some(db) = sqlite_file(url)
        && let Some(parent) = db.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    println!("Running migrations for {url}...");
    let pool = sqlx::SqlitePool::connect(url).await?;
    racefeed_sync::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("sync migrations failed: {e}"))?;
    pool.close().await;

    println!("All migrations complete.");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    fn url_for(db: &Path) -> String {
        format!("sqlite://{}?mode=rwc", db.display())
    }

    #[test]
    fn companion_files_keep_the_full_name() {
        let files = database_files(Path::new("/data/racefeed.db"));
        assert_eq!(
            files,
            vec![
                PathBuf::from("/data/racefeed.db"),
                PathBuf::from("/data/racefeed.db-wal"),
                PathBuf::from("/data/racefeed.db-shm"),
            ]
        );
    }

    #[test]
    fn reset_deletes_files() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("racefeed.db");
        for path in database_files(&db) {
            std::fs::write(&path, "test").unwrap();
        }

        reset_database(&url_for(&db)).unwrap();

        for path in database_files(&db) {
            assert!(!path.exists(), "{} should be deleted", path.display());
        }
    }

    #[test]
    fn reset_refuses_in_memory_databases() {
        assert!(reset_database("sqlite::memory:").is_err());
    }

    #[tokio::test]
    async fn migrations_create_tables_and_are_idempotent() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("data/racefeed.db");
        let url = url_for(&db);

        run_migrations(&url).await.unwrap();
        run_migrations(&url).await.unwrap();

        let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
        for table in ["sync_configurations", "sync_schedules", "sync_logs"] {
            let _: (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM {table}"))
                .fetch_one(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
        assert!(db.exists(), "database should be created");
    }
}
