// mysql-helper/src/clone/mod.rs
use async_trait::async_trait;
use std::fs;
use tracing::{info, warn};

use crate::backup::create_backup;
use crate::errors::{AppError, Result};
use crate::profiles::resolver::{ConnectionParams, RemoteParams};
use crate::restore::db_restore::restore_into;
use crate::utils::remote::{RemoteCommand, exec_checked};
use crate::workflow::select::{self, Choice, TargetDatabase, missing_flag, selected};
use crate::workflow::{Context, Step, Workflow};

/// Where the source database lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CloneSource {
    Local,
    Remote,
}

/// Values supplied on the command line.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    pub source: CloneSource,
    pub profile: Option<String>,
    pub remote: Option<String>,
    pub remote_profile: Option<String>,
    pub remote_connection: Option<String>,
    pub src_database: Option<String>,
    pub connection: Option<String>,
    pub dest_database: Option<String>,
}

impl CloneOptions {
    pub fn new(source: CloneSource) -> Self {
        CloneOptions {
            source,
            profile: None,
            remote: None,
            remote_profile: None,
            remote_connection: None,
            src_database: None,
            connection: None,
            dest_database: None,
        }
    }
}

/// Fully qualified identity of a database, used to refuse cloning onto itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseKey {
    Local { profile: String, connection: String, database: String },
    Remote { remote: String, profile: String, connection: String, database: String },
}

/// Copies a database into a (possibly new) local database.
#[derive(Debug)]
pub struct CloneWorkflow {
    options: CloneOptions,
    profile: Option<String>,
    remote: Option<RemoteParams>,
    remote_profile: Option<String>,
    remote_connection: Option<String>,
    connection: Option<ConnectionParams>,
    source_database: Option<String>,
    target: Option<TargetDatabase>,
}

impl CloneWorkflow {
    pub fn new(options: CloneOptions) -> Self {
        CloneWorkflow {
            options,
            profile: None,
            remote: None,
            remote_profile: None,
            remote_connection: None,
            connection: None,
            source_database: None,
            target: None,
        }
    }

    pub fn source_key(&self) -> Result<DatabaseKey> {
        let database = selected(&self.source_database, "source database")?.clone();
        Ok(match self.options.source {
            CloneSource::Local => DatabaseKey::Local {
                profile: selected(&self.profile, "profile")?.clone(),
                connection: selected(&self.connection, "connection")?.name.clone(),
                database,
            },
            CloneSource::Remote => DatabaseKey::Remote {
                remote: selected(&self.remote, "remote")?.name.clone(),
                profile: selected(&self.remote_profile, "remote profile")?.clone(),
                connection: selected(&self.remote_connection, "remote connection")?.clone(),
                database,
            },
        })
    }

    pub fn destination_key(&self) -> Result<DatabaseKey> {
        Ok(DatabaseKey::Local {
            profile: selected(&self.profile, "profile")?.clone(),
            connection: selected(&self.connection, "connection")?.name.clone(),
            database: selected(&self.target, "destination database")?.name.clone(),
        })
    }

    fn select_local_connection(&mut self, cx: &Context<'_>) -> Result<Step> {
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

    /// Remote, remote profile, remote connection, then the local connection.
    /// Escaping a menu returns to the previous answered menu of this chain.
    fn select_remote_chain(&mut self, cx: &Context<'_>) -> Result<Step> {
        let mut position = 0;
        let mut answered: Vec<usize> = Vec::new();

        while position < 4 {
            let step = match position {
                0 => {
                    let profile = selected(&self.profile, "profile")?;
                    select::remote(cx, profile, self.options.remote.as_deref())?.store(&mut self.remote)
                }
                1 => {
                    let remote = selected(&self.remote, "remote")?;
                    let names = list_remote(cx, remote, &["profiles"])?;
                    select::choose_name(
                        cx,
                        "Remote profile",
                        "remote-profile",
                        self.options.remote_profile.as_deref(),
                        &names,
                        "Select remote profile",
                    )?
                    .store(&mut self.remote_profile)
                }
                2 => {
                    let remote = selected(&self.remote, "remote")?;
                    let profile_flag = format!("--profile={}", selected(&self.remote_profile, "remote profile")?);
                    let names = list_remote(cx, remote, &["connections", &profile_flag])?;
                    select::choose_name(
                        cx,
                        "Remote connection",
                        "remote-connection",
                        self.options.remote_connection.as_deref(),
                        &names,
                        "Select remote connection",
                    )?
                    .store(&mut self.remote_connection)
                }
                _ => self.select_local_connection(cx)?,
            };

            match step {
                Step::Answered => {
                    answered.push(position);
                    position += 1;
                }
                Step::Given => position += 1,
                Step::Back => match answered.pop() {
                    Some(previous) => position = previous,
                    None => return Ok(Step::Back),
                },
            }
        }

        Ok(if answered.is_empty() { Step::Given } else { Step::Answered })
    }

    async fn choose_source_database(&self, cx: &Context<'_>) -> Result<Choice<String>> {
        let value = self.options.src_database.as_deref();
        match self.options.source {
            CloneSource::Local => {
                let params = selected(&self.connection, "connection")?;
                select::existing_database(cx, params, "src-database", value, "Select source database").await
            }
            CloneSource::Remote => {
                if value.is_none() && !cx.interactive {
                    return Err(missing_flag("src-database"));
                }
                let remote = selected(&self.remote, "remote")?;
                let profile_flag = format!("--profile={}", selected(&self.remote_profile, "remote profile")?);
                let connection_flag =
                    format!("--connection={}", selected(&self.remote_connection, "remote connection")?);
                let names = list_remote(cx, remote, &["databases", &profile_flag, &connection_flag])?;
                select::choose_name(cx, "Remote database", "src-database", value, &names, "Select remote database")
            }
        }
    }

    async fn clone_local(&self, cx: &Context<'_>) -> Result<Option<String>> {
        let profile = selected(&self.profile, "profile")?;
        let params = selected(&self.connection, "connection")?;
        let source = selected(&self.source_database, "source database")?;
        let target = selected(&self.target, "destination database")?;

        let archive = create_backup(cx, profile, params, source).await?;
        restore_into(cx, params, &target.name, &archive).await?;
        fs::remove_file(&archive).map_err(|e| AppError::io(&archive, e))?;

        info!(source = %source, destination = %target.name, connection = %params.name, "Clone complete");
        Ok(None)
    }

    fn clone_remote(&self, cx: &Context<'_>) -> Result<Option<String>> {
        let remote = selected(&self.remote, "remote")?;
        let remote_profile = selected(&self.remote_profile, "remote profile")?;
        let remote_connection = selected(&self.remote_connection, "remote connection")?;
        let source = selected(&self.source_database, "source database")?;

        eprintln!("🌐 Backing up {} on {}...", source, remote.name);
        let command = RemoteCommand::new(cx.config.settings.remote_binary.as_str())
            .arg("--no-interaction")
            .arg("backup")
            .arg(format!("--profile={}", remote_profile))
            .arg(format!("--connection={}", remote_connection))
            .arg(format!("--database={}", source))
            .arg("--no-progress");
        let output = exec_checked(cx.remotes, remote, &command)?;

        let remote_path = output
            .stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())
            .ok_or_else(|| AppError::external("Remote backup failed", "remote did not return a path to the backup file"))?
            .to_string();

        warn!(remote = %remote.name, path = %remote_path, "Transfer of remote backups is not implemented");
        eprintln!(
            "⚠️  Copying the archive from {} and restoring it locally is not implemented yet; it remains on the remote.",
            remote.name
        );
        Ok(Some(remote_path))
    }
}

/// Runs `display <args> --json` on the remote and decodes the name list.
fn list_remote(cx: &Context<'_>, remote: &RemoteParams, args: &[&str]) -> Result<Vec<String>> {
    let command = RemoteCommand::new(cx.config.settings.remote_binary.as_str())
        .arg("--no-interaction")
        .arg("display")
        .args(args.iter().copied())
        .arg("--json");
    let output = exec_checked(cx.remotes, remote, &command)?;
    serde_json::from_str::<Vec<String>>(output.stdout.trim()).map_err(|e| {
        AppError::external(format!("Remote {} returned an unreadable listing", remote.name), e)
    })
}

#[async_trait]
impl Workflow for CloneWorkflow {
    fn kind(&self) -> &'static str {
        "clone"
    }

    fn destructive(&self) -> bool {
        true
    }

    async fn select_profile(&mut self, cx: &Context<'_>) -> Result<Step> {
        Ok(select::profile(cx, self.options.profile.as_deref())?.store(&mut self.profile))
    }

    async fn select_connection(&mut self, cx: &Context<'_>) -> Result<Step> {
        match self.options.source {
            CloneSource::Local => self.select_local_connection(cx),
            CloneSource::Remote => self.select_remote_chain(cx),
        }
    }

    /// Source database, then the local destination.
    async fn select_database(&mut self, cx: &Context<'_>) -> Result<Step> {
        loop {
            let (source, source_answered) = match self.choose_source_database(cx).await? {
                Choice::Answered(source) => (source, true),
                Choice::Given(source) => (source, false),
                Choice::Back => return Ok(Step::Back),
            };

            let params = selected(&self.connection, "connection")?;
            let destination = select::target_database(
                cx,
                params,
                "dest-database",
                self.options.dest_database.as_deref(),
                "Select destination database",
            )
            .await?;

            let destination_answered = matches!(destination, Choice::Answered(_));
            match destination {
                Choice::Answered(target) | Choice::Given(target) => {
                    self.source_database = Some(source);
                    self.target = Some(target);
                    return Ok(if source_answered || destination_answered { Step::Answered } else { Step::Given });
                }
                Choice::Back if source_answered => continue,
                Choice::Back => return Ok(Step::Back),
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.source_key()? == self.destination_key()? {
            return Err(AppError::invalid("Source and destination databases must differ"));
        }
        Ok(())
    }

    fn summary(&self) -> String {
        let source = self.source_database.as_deref().unwrap_or("?");
        let target = self.target.as_ref().map_or("?", |t| t.name.as_str());
        let connection = self.connection.as_ref().map_or("?", |c| c.name.as_str());
        match self.options.source {
            CloneSource::Local => format!(
                "Clone {} into {} on {} (the destination will be dropped and recreated)",
                source, target, connection
            ),
            CloneSource::Remote => format!(
                "Back up {} ({}/{}) on {}; restoring it into {} on {} is not implemented, the destination stays untouched",
                source,
                self.remote_profile.as_deref().unwrap_or("?"),
                self.remote_connection.as_deref().unwrap_or("?"),
                self.remote.as_ref().map_or("?", |r| r.name.as_str()),
                target,
                connection
            ),
        }
    }

    async fn execute(&mut self, cx: &Context<'_>) -> Result<Option<String>> {
        match self.options.source {
            CloneSource::Local => self.clone_local(cx).await,
            CloneSource::Remote => self.clone_remote(cx),
        }
    }
}
