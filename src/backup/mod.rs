pub(crate) mod archive;
pub(crate) mod db_dump;

use async_trait::async_trait;
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::{AppError, Result};
use crate::profiles::resolver::ConnectionParams;
use crate::utils::process::run_checked;
use crate::workflow::select::{self, selected};
use crate::workflow::{Context, Step, Workflow};

/// File name of the dump inside every backup archive.
pub const DUMP_FILE_NAME: &str = "backup.sql";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub profile: Option<String>,
    pub connection: Option<String>,
    pub database: Option<String>,
}

/// Dumps one local database into `backups/<profile>/<database>/<timestamp>.tar.gz`.
#[derive(Debug, Default)]
pub struct BackupWorkflow {
    options: BackupOptions,
    profile: Option<String>,
    connection: Option<ConnectionParams>,
    database: Option<String>,
}

impl BackupWorkflow {
    pub fn new(options: BackupOptions) -> Self {
        BackupWorkflow { options, ..Default::default() }
    }
}

#[async_trait]
impl Workflow for BackupWorkflow {
    fn kind(&self) -> &'static str {
        "backup"
    }

    fn destructive(&self) -> bool {
        false
    }

    async fn select_profile(&mut self, cx: &Context<'_>) -> Result<Step> {
        Ok(select::profile(cx, self.options.profile.as_deref())?.store(&mut self.profile))
    }

    async fn select_connection(&mut self, cx: &Context<'_>) -> Result<Step> {
        let profile = selected(&self.profile, "profile")?;
        let choice = select::local_connection(
            cx,
            profile,
            "connection",
            self.options.connection.as_deref(),
            "Select local connection",
        )?;
        Ok(choice.store(&mut self.connection))
    }

    async fn select_database(&mut self, cx: &Context<'_>) -> Result<Step> {
        let params = selected(&self.connection, "connection")?;
        let choice = select::existing_database(
            cx,
            params,
            "database",
            self.options.database.as_deref(),
            "Select database to back up",
        )
        .await?;
        Ok(choice.store(&mut self.database))
    }

    fn summary(&self) -> String {
        format!(
            "Back up {} on {}",
            self.database.as_deref().unwrap_or("?"),
            self.connection.as_ref().map_or("?", |c| c.name.as_str())
        )
    }

    async fn execute(&mut self, cx: &Context<'_>) -> Result<Option<String>> {
        let profile = selected(&self.profile, "profile")?;
        let params = selected(&self.connection, "connection")?;
        let database = selected(&self.database, "database")?;

        let archive = create_backup(cx, profile, params, database).await?;
        Ok(Some(archive.display().to_string()))
    }
}

/// Bytes the progress bar should expect: a fraction of the on-disk size, at least 1 MiB.
pub fn estimated_dump_bytes(size_mb: f64, ratio: f64) -> u64 {
    ((size_mb * ratio).max(1.0) * BYTES_PER_MB) as u64
}

/// Dumps `database`, strips DEFINER clauses and archives the result. Returns the
/// archive path. Shared by restore (pre-restore backup) and clone.
pub async fn create_backup(
    cx: &Context<'_>,
    profile: &str,
    params: &ConnectionParams,
    database: &str,
) -> Result<PathBuf> {
    cx.processes.ensure_available(&[db_dump::MYSQLDUMP])?;

    let size_mb = cx.databases.database_size_mb(params, database).await?;
    let expected = estimated_dump_bytes(size_mb, cx.config.settings.size_ratio);

    let backups_dir = cx.config.backups_dir();
    fs::create_dir_all(&backups_dir).map_err(|e| AppError::io(&backups_dir, e))?;
    let work_dir = tempfile::Builder::new()
        .prefix(".dump-")
        .tempdir_in(&backups_dir)
        .map_err(|e| AppError::io(&backups_dir, e))?;
    let dump_path = work_dir.path().join(DUMP_FILE_NAME);

    eprintln!("💾 Dumping {} from {} ({:.1} MB on disk)...", database, params.name, size_mb);
    let request = db_dump::dump_request(params, database, &cx.config.settings.mysqldump_options)
        .stdout_to(&dump_path)
        .with_progress(format!("Dumping {}", database), expected);
    run_checked(cx.processes, &request)?;

    let dump_size = db_dump::verify_dump(&dump_path)?;
    let stripped = db_dump::strip_definers(&dump_path)?;
    info!(database, bytes = dump_size, definers_stripped = stripped, "Dump complete");

    let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let archive_path = reserve_archive_path(&cx.config.backup_dir_for(profile, database), &stamp)?;
    if let Err(e) = archive::create_tar_gz_archive(work_dir.path(), &archive_path) {
        if let Err(cleanup) = fs::remove_file(&archive_path) {
            debug!(error = %cleanup, path = %archive_path.display(), "Failed to remove partial archive");
        }
        return Err(e);
    }
    eprintln!("✓ Backup archived at {}", archive_path.display());

    Ok(archive_path)
}

/// Claims `<stamp>.tar.gz` in `dir`, or `<stamp>-N.tar.gz` when backups
/// taken within the same second already hold the name.
pub fn reserve_archive_path(dir: &Path, stamp: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| AppError::io(dir, e))?;
    for sequence in 0u32.. {
        let name = match sequence {
            0 => format!("{}.tar.gz", stamp),
            n => format!("{}-{}.tar.gz", stamp, n),
        };
        let candidate = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(AppError::io(&candidate, e)),
        }
    }
    Err(AppError::external("No free archive name", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::profiles::Profiles;
    use crate::testing::{
        Answer, FakeDatabase, FakeRemote, RecordingProcessRunner, ScriptedPrompter, config_in, prod_profiles,
    };
    use crate::workflow::{Status, run};
    use tempfile::TempDir;

    struct Fixture {
        _home: TempDir,
        config: AppConfig,
        profiles: Profiles,
        databases: FakeDatabase,
        processes: RecordingProcessRunner,
        remotes: FakeRemote,
    }

    impl Fixture {
        fn new() -> Self {
            let home = TempDir::new().expect("temp dir");
            Fixture {
                config: config_in(home.path()),
                _home: home,
                profiles: prod_profiles(),
                databases: FakeDatabase::with("db1", &["shop", "blog"]),
                processes: RecordingProcessRunner::default(),
                remotes: FakeRemote::default(),
            }
        }

        fn context<'a>(&'a self, prompter: &'a ScriptedPrompter, interactive: bool) -> Context<'a> {
            Context {
                config: &self.config,
                profiles: &self.profiles,
                prompter,
                databases: &self.databases,
                processes: &self.processes,
                remotes: &self.remotes,
                interactive,
                assume_yes: false,
            }
        }
    }

    #[test]
    fn test_archive_names_in_the_same_second_do_not_collide() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let shop = dir.path().join("prod").join("shop");

        let first = reserve_archive_path(&shop, "2024-01-01-10-00-00")?;
        let second = reserve_archive_path(&shop, "2024-01-01-10-00-00")?;
        let third = reserve_archive_path(&shop, "2024-01-01-10-00-00")?;

        assert!(first.ends_with("2024-01-01-10-00-00.tar.gz"));
        assert!(second.ends_with("2024-01-01-10-00-00-1.tar.gz"));
        assert!(third.ends_with("2024-01-01-10-00-00-2.tar.gz"));
        assert!(first.is_file() && second.is_file() && third.is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_backups_within_one_second_keep_both_archives() -> anyhow::Result<()> {
        let fixture = Fixture::new();
        let params = crate::profiles::resolver::resolve_local(&fixture.profiles, "prod", "db1")?;
        let prompter = ScriptedPrompter::new([]);
        let cx = fixture.context(&prompter, false);

        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let existing = reserve_archive_path(&fixture.config.backup_dir_for("prod", "shop"), &stamp)?;
        fs::write(&existing, "user archive")?;

        let created = create_backup(&cx, "prod", &params, "shop").await?;

        assert_ne!(created, existing);
        assert_eq!(fs::read_to_string(&existing)?, "user archive");
        assert!(created.is_file());
        Ok(())
    }

    #[test]
    fn test_estimated_dump_bytes() {
        assert_eq!(estimated_dump_bytes(0.0, 0.65), 1024 * 1024);
        assert_eq!(estimated_dump_bytes(100.0, 0.5), 50 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_backup_from_flags_writes_archive() -> anyhow::Result<()> {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([]);
        let mut workflow = BackupWorkflow::new(BackupOptions {
            profile: Some("prod".to_string()),
            connection: Some("db1".to_string()),
            database: Some("shop".to_string()),
        });

        let report = run(&mut workflow, &fixture.context(&prompter, false)).await;

        assert!(matches!(report.status, Status::Completed), "{:?}", report.status);
        let archive = PathBuf::from(report.artifact.expect("artifact path"));
        assert!(archive.starts_with(fixture.config.backup_dir_for("prod", "shop")));
        assert!(archive.to_string_lossy().ends_with(".tar.gz"));

        let extracted = fixture.config.home.join("check");
        archive::extract_tar_gz_archive(&archive, &extracted)?;
        let sql = fs::read_to_string(extracted.join(DUMP_FILE_NAME))?;
        assert!(!sql.contains("DEFINER=`admin`"));

        let requests = fixture.processes.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].program, "mysqldump");
        assert_eq!(requests[0].progress.as_ref().map(|p| p.total_bytes), Some(estimated_dump_bytes(4.0, 0.65)));

        let leftovers: Vec<_> = fs::read_dir(fixture.config.backups_dir())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".dump-"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_interactive_backup_walks_the_menus() -> anyhow::Result<()> {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([
            Answer::Pick("prod"),
            Answer::Pick("db1"),
            Answer::Escape,
            Answer::Pick("db1"),
            Answer::Pick("blog"),
        ]);
        let mut workflow = BackupWorkflow::new(BackupOptions::default());

        let report = run(&mut workflow, &fixture.context(&prompter, true)).await;

        assert!(matches!(report.status, Status::Completed), "{:?}", report.status);
        assert_eq!(prompter.remaining(), 0);
        assert_eq!(fixture.processes.requests()[0].args.last().map(String::as_str), Some("blog"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_database_flag_runs_nothing() {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([]);
        let mut workflow = BackupWorkflow::new(BackupOptions {
            profile: Some("prod".to_string()),
            connection: Some("db1".to_string()),
            database: Some("missing".to_string()),
        });

        let report = run(&mut workflow, &fixture.context(&prompter, false)).await;

        assert!(matches!(report.status, Status::Failed(AppError::InvalidSelection(_))));
        assert!(fixture.processes.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_dump_is_reported() {
        let fixture = Fixture::new();
        fixture.processes.push_status(2);
        let prompter = ScriptedPrompter::new([]);
        let mut workflow = BackupWorkflow::new(BackupOptions {
            profile: Some("prod".to_string()),
            connection: Some("db1".to_string()),
            database: Some("shop".to_string()),
        });

        let report = run(&mut workflow, &fixture.context(&prompter, false)).await;

        assert!(matches!(report.status, Status::Failed(AppError::ExternalFailure { .. })));
        assert!(!fixture.config.backup_dir_for("prod", "shop").exists());
    }

    #[tokio::test]
    async fn test_empty_dump_is_a_failure() {
        let fixture = Fixture::new();
        fixture.processes.set_dump("");
        let prompter = ScriptedPrompter::new([]);
        let mut workflow = BackupWorkflow::new(BackupOptions {
            profile: Some("prod".to_string()),
            connection: Some("db1".to_string()),
            database: Some("shop".to_string()),
        });

        let report = run(&mut workflow, &fixture.context(&prompter, false)).await;
        assert!(matches!(report.status, Status::Failed(AppError::ExternalFailure { .. })));
    }
}
