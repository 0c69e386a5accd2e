pub(crate) mod catalog;
pub(crate) mod db_restore;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::backup::create_backup;
use crate::errors::{AppError, Result};
use crate::profiles::resolver::ConnectionParams;
use crate::workflow::select::{self, Choice, TargetDatabase, missing_flag, selected};
use crate::workflow::{Context, Step, Workflow};

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub profile: Option<String>,
    pub sql_path: Option<PathBuf>,
    pub connection: Option<String>,
    pub database: Option<String>,
    /// Back up the target before restoring. Asked when unset.
    pub backup: Option<bool>,
}

/// Replaces a local database with the contents of a backup archive or SQL file.
#[derive(Debug, Default)]
pub struct RestoreWorkflow {
    options: RestoreOptions,
    profile: Option<String>,
    source: Option<PathBuf>,
    connection: Option<ConnectionParams>,
    target: Option<TargetDatabase>,
    backup_first: bool,
}

impl RestoreWorkflow {
    pub fn new(options: RestoreOptions) -> Self {
        RestoreWorkflow { options, ..Default::default() }
    }

    /// The `--sql-path` file, or a menu over `backups/<profile>/<database>/`.
    fn choose_source(&self, cx: &Context<'_>, profile: &str) -> Result<Choice<PathBuf>> {
        if let Some(path) = &self.options.sql_path {
            if !path.is_file() {
                return Err(AppError::invalid(format!("SQL file {} does not exist", path.display())));
            }
            return Ok(Choice::Given(path.clone()));
        }
        if !cx.interactive {
            return Err(missing_flag("sql-path"));
        }

        let profile_backups = cx.config.backups_dir().join(profile);
        let databases = catalog::backed_up_databases(&profile_backups)?;
        if databases.is_empty() {
            return Err(AppError::invalid(format!(
                "No backups found for profile {}; pass --sql-path to restore from a file",
                profile
            )));
        }

        loop {
            let Some(index) = cx.prompter.select("Select backup", &databases)? else {
                return Ok(Choice::Back);
            };
            let Some(database) = databases.get(index) else {
                return Err(AppError::invalid(format!("Menu returned unknown entry {}", index)));
            };

            let archives = catalog::archives(&profile_backups.join(database))?;
            let labels: Vec<String> = archives.iter().map(|a| catalog::archive_label(a)).collect();
            match cx.prompter.select(&format!("Select {} backup", database), &labels)? {
                Some(index) => {
                    return archives
                        .get(index)
                        .map(|archive| Choice::Answered(archive.clone()))
                        .ok_or_else(|| AppError::invalid(format!("Menu returned unknown entry {}", index)));
                }
                None => continue,
            }
        }
    }

    fn source_name(&self) -> String {
        self.source
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "?".to_string())
    }
}

#[async_trait]
impl Workflow for RestoreWorkflow {
    fn kind(&self) -> &'static str {
        "restore"
    }

    fn destructive(&self) -> bool {
        true
    }

    /// Profile, then the file to restore from.
    async fn select_profile(&mut self, cx: &Context<'_>) -> Result<Step> {
        loop {
            let (profile, profile_answered) = match select::profile(cx, self.options.profile.as_deref())? {
                Choice::Answered(profile) => (profile, true),
                Choice::Given(profile) => (profile, false),
                Choice::Back => return Ok(Step::Back),
            };

            let (source, source_answered) = match self.choose_source(cx, &profile)? {
                Choice::Answered(source) => (source, true),
                Choice::Given(source) => (source, false),
                Choice::Back if profile_answered => continue,
                Choice::Back => return Ok(Step::Back),
            };

            self.profile = Some(profile);
            self.source = Some(source);
            return Ok(if profile_answered || source_answered { Step::Answered } else { Step::Given });
        }
    }

    async fn select_connection(&mut self, cx: &Context<'_>) -> Result<Step> {
        let profile = selected(&self.profile, "profile")?;
        let choice = select::local_connection(
            cx,
            profile,
            "connection",
            self.options.connection.as_deref(),
            "Select local connection to restore into",
        )?;
        Ok(choice.store(&mut self.connection))
    }

    /// Target database, then whether to back it up first.
    async fn select_database(&mut self, cx: &Context<'_>) -> Result<Step> {
        let params = selected(&self.connection, "connection")?;
        let (target, mut answered) = match select::target_database(
            cx,
            params,
            "database",
            self.options.database.as_deref(),
            "Select database to restore into",
        )
        .await?
        {
            Choice::Answered(target) => (target, true),
            Choice::Given(target) => (target, false),
            Choice::Back => return Ok(Step::Back),
        };

        self.backup_first = match self.options.backup {
            Some(backup) => backup,
            None if target.exists && cx.interactive => {
                answered = true;
                cx.prompter.confirm("Backup before restoring?", true)?
            }
            None => false,
        };
        self.target = Some(target);
        Ok(if answered { Step::Answered } else { Step::Given })
    }

    fn summary(&self) -> String {
        format!(
            "Restore {} into {} on {} (the database will be dropped and recreated)",
            self.source_name(),
            self.target.as_ref().map_or("?", |t| t.name.as_str()),
            self.connection.as_ref().map_or("?", |c| c.name.as_str())
        )
    }

    async fn execute(&mut self, cx: &Context<'_>) -> Result<Option<String>> {
        let profile = selected(&self.profile, "profile")?;
        let source = selected(&self.source, "source file")?;
        let params = selected(&self.connection, "connection")?;
        let target = selected(&self.target, "database")?;

        let mut safety_backup = None;
        if self.backup_first && target.exists {
            safety_backup = Some(create_backup(cx, profile, params, &target.name).await?);
        }

        db_restore::restore_into(cx, params, &target.name, source).await?;
        Ok(safety_backup.map(|path| path.display().to_string()))
    }
}
