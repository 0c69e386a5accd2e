//! Stage machine shared by the backup, restore and clone workflows.
//!
//! Every workflow walks `SelectProfile -> SelectConnection -> SelectDatabase ->
//! Confirm -> Execute -> Report`. Selection stages either take their value from a
//! flag (validated, no prompt) or ask the user; escaping a menu steps back to the
//! last stage that prompted, and escaping the first one cancels the workflow.

pub mod select;

use async_trait::async_trait;
use std::process::ExitCode;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::profiles::Profiles;
use crate::utils::database::DatabaseClient;
use crate::utils::process::ProcessRunner;
use crate::utils::prompt::Prompter;
use crate::utils::remote::RemoteExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SelectProfile,
    SelectConnection,
    SelectDatabase,
    Confirm,
    Execute,
    Report,
}

impl Stage {
    fn next(self) -> Stage {
        match self {
            Stage::SelectProfile => Stage::SelectConnection,
            Stage::SelectConnection => Stage::SelectDatabase,
            Stage::SelectDatabase => Stage::Confirm,
            Stage::Confirm => Stage::Execute,
            Stage::Execute | Stage::Report => Stage::Report,
        }
    }
}

/// Result of running one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The stage asked the user; going back later returns here.
    Answered,
    /// The stage completed without asking anything.
    Given,
    /// The user escaped; return to the previous answered stage.
    Back,
}

/// Everything a workflow may touch. Built once per invocation.
pub struct Context<'a> {
    pub config: &'a AppConfig,
    pub profiles: &'a Profiles,
    pub prompter: &'a dyn Prompter,
    pub databases: &'a dyn DatabaseClient,
    pub processes: &'a dyn ProcessRunner,
    pub remotes: &'a dyn RemoteExecutor,
    /// False with `--no-interaction`: any missing value is an error.
    pub interactive: bool,
    /// `--yes`/`--force`: skip the destructive-action confirmation.
    pub assume_yes: bool,
}

#[async_trait]
pub trait Workflow: Send {
    fn kind(&self) -> &'static str;

    /// Destructive workflows must be confirmed (or run with `--yes`).
    fn destructive(&self) -> bool;

    async fn select_profile(&mut self, cx: &Context<'_>) -> Result<Step>;

    async fn select_connection(&mut self, cx: &Context<'_>) -> Result<Step>;

    async fn select_database(&mut self, cx: &Context<'_>) -> Result<Step>;

    /// Cross-stage checks, run before confirmation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// One line describing what `execute` is about to do.
    fn summary(&self) -> String;

    /// Performs the operation, returning the produced artifact (a path) if any.
    async fn execute(&mut self, cx: &Context<'_>) -> Result<Option<String>>;
}

#[derive(Debug)]
pub enum Status {
    Completed,
    Cancelled,
    Failed(AppError),
}

#[derive(Debug)]
pub struct Report {
    pub workflow: &'static str,
    pub status: Status,
    pub artifact: Option<String>,
}

impl Report {
    /// Status line on stderr, artifact path alone on stdout.
    pub fn emit(&self) {
        match &self.status {
            Status::Completed => {
                eprintln!("✅ {} completed successfully.", capitalize(self.workflow));
                if let Some(artifact) = &self.artifact {
                    println!("{}", artifact);
                }
            }
            Status::Cancelled => eprintln!("↩️  {} cancelled.", capitalize(self.workflow)),
            Status::Failed(e) => eprintln!("❌ {} failed: {}", capitalize(self.workflow), e),
        }
    }

    /// 0 when completed or cancelled, 1 when failed.
    pub fn code(&self) -> u8 {
        match self.status {
            Status::Completed | Status::Cancelled => 0,
            Status::Failed(_) => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

enum Outcome {
    Completed(Option<String>),
    Cancelled,
}

/// Drives `workflow` through every stage and always produces a report.
pub async fn run(workflow: &mut dyn Workflow, cx: &Context<'_>) -> Report {
    let (status, artifact) = match drive(workflow, cx).await {
        Ok(Outcome::Completed(artifact)) => (Status::Completed, artifact),
        Ok(Outcome::Cancelled) => (Status::Cancelled, None),
        Err(e) => (Status::Failed(e), None),
    };
    Report { workflow: workflow.kind(), status, artifact }
}

async fn drive(workflow: &mut dyn Workflow, cx: &Context<'_>) -> Result<Outcome> {
    let mut stage = Stage::SelectProfile;
    let mut history: Vec<Stage> = Vec::new();

    loop {
        debug!(workflow = workflow.kind(), ?stage, "Entering stage");
        let step = match stage {
            Stage::SelectProfile => workflow.select_profile(cx).await?,
            Stage::SelectConnection => workflow.select_connection(cx).await?,
            Stage::SelectDatabase => workflow.select_database(cx).await?,
            Stage::Confirm => {
                workflow.validate()?;
                match confirm(workflow, cx)? {
                    Some(step) => step,
                    None => return Ok(Outcome::Cancelled),
                }
            }
            Stage::Execute => {
                info!(workflow = workflow.kind(), summary = %workflow.summary(), "Executing");
                let artifact = workflow.execute(cx).await?;
                return Ok(Outcome::Completed(artifact));
            }
            Stage::Report => return Ok(Outcome::Completed(None)),
        };

        match step {
            Step::Answered => {
                history.push(stage);
                stage = stage.next();
            }
            Step::Given => stage = stage.next(),
            Step::Back => match history.pop() {
                Some(previous) => stage = previous,
                None => return Ok(Outcome::Cancelled),
            },
        }
    }
}

/// `None` when the user declines.
fn confirm(workflow: &dyn Workflow, cx: &Context<'_>) -> Result<Option<Step>> {
    if !workflow.destructive() || cx.assume_yes {
        return Ok(Some(Step::Given));
    }
    if !cx.interactive {
        return Err(AppError::invalid(format!(
            "{} is destructive; pass --yes to run it without interaction",
            workflow.kind()
        )));
    }

    let question = format!("{}. Continue?", workflow.summary());
    Ok(cx.prompter.confirm(&question, false)?.then_some(Step::Answered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Answer, FakeDatabase, FakeRemote, RecordingProcessRunner, ScriptedPrompter, config_in};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records stage visits; each selection stage plays one scripted step.
    struct StubWorkflow {
        destructive: bool,
        steps: Vec<(Stage, Step)>,
        visits: Vec<Stage>,
        executed: AtomicUsize,
        invalid: bool,
    }

    impl StubWorkflow {
        fn new(steps: Vec<(Stage, Step)>) -> Self {
            StubWorkflow { destructive: true, steps, visits: Vec::new(), executed: AtomicUsize::new(0), invalid: false }
        }

        fn play(&mut self, stage: Stage) -> Result<Step> {
            self.visits.push(stage);
            let position = self.steps.iter().position(|(s, _)| *s == stage);
            Ok(match position {
                Some(index) => self.steps.remove(index).1,
                None => Step::Answered,
            })
        }
    }

    #[async_trait]
    impl Workflow for StubWorkflow {
        fn kind(&self) -> &'static str {
            "stub"
        }

        fn destructive(&self) -> bool {
            self.destructive
        }

        async fn select_profile(&mut self, _cx: &Context<'_>) -> Result<Step> {
            self.play(Stage::SelectProfile)
        }

        async fn select_connection(&mut self, _cx: &Context<'_>) -> Result<Step> {
            self.play(Stage::SelectConnection)
        }

        async fn select_database(&mut self, _cx: &Context<'_>) -> Result<Step> {
            self.play(Stage::SelectDatabase)
        }

        fn validate(&self) -> Result<()> {
            if self.invalid { Err(AppError::invalid("source equals destination")) } else { Ok(()) }
        }

        fn summary(&self) -> String {
            "StubWorkflow things".to_string()
        }

        async fn execute(&mut self, _cx: &Context<'_>) -> Result<Option<String>> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok(Some("/tmp/artifact".to_string()))
        }
    }

    struct Fixture {
        config: AppConfig,
        profiles: Profiles,
        databases: FakeDatabase,
        processes: RecordingProcessRunner,
        remotes: FakeRemote,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                config: config_in(std::path::Path::new("/nonexistent")),
                profiles: Profiles::new(),
                databases: FakeDatabase::default(),
                processes: RecordingProcessRunner::default(),
                remotes: FakeRemote::default(),
            }
        }

        fn context<'a>(&'a self, prompter: &'a ScriptedPrompter, interactive: bool, assume_yes: bool) -> Context<'a> {
            Context {
                config: &self.config,
                profiles: &self.profiles,
                prompter,
                databases: &self.databases,
                processes: &self.processes,
                remotes: &self.remotes,
                interactive,
                assume_yes,
            }
        }
    }

    #[tokio::test]
    async fn test_confirmed_run_completes_with_artifact() {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([Answer::Confirm(true)]);
        let mut stub = StubWorkflow::new(vec![]);

        let report = run(&mut stub, &fixture.context(&prompter, true, false)).await;

        assert!(matches!(report.status, Status::Completed));
        assert_eq!(report.artifact.as_deref(), Some("/tmp/artifact"));
        assert_eq!(stub.executed.load(Ordering::SeqCst), 1);
        assert_eq!(prompter.asked(), vec!["StubWorkflow things. Continue?".to_string()]);
    }

    #[tokio::test]
    async fn test_back_returns_to_previous_answered_stage() {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([Answer::Confirm(true)]);
        let mut stub = StubWorkflow::new(vec![(Stage::SelectDatabase, Step::Back)]);

        let report = run(&mut stub, &fixture.context(&prompter, true, false)).await;

        assert!(matches!(report.status, Status::Completed));
        assert_eq!(
            stub.visits,
            vec![
                Stage::SelectProfile,
                Stage::SelectConnection,
                Stage::SelectDatabase,
                Stage::SelectConnection,
                Stage::SelectDatabase,
            ]
        );
    }

    #[tokio::test]
    async fn test_back_skips_stages_supplied_by_flags() {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([]);
        let mut stub = StubWorkflow::new(vec![
            (Stage::SelectProfile, Step::Given),
            (Stage::SelectConnection, Step::Given),
            (Stage::SelectDatabase, Step::Back),
        ]);

        let report = run(&mut stub, &fixture.context(&prompter, true, false)).await;

        assert!(matches!(report.status, Status::Cancelled));
        assert_eq!(report.code(), 0);
        assert_eq!(stub.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_back_out_of_first_stage_cancels() {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([]);
        let mut stub = StubWorkflow::new(vec![(Stage::SelectProfile, Step::Back)]);

        let report = run(&mut stub, &fixture.context(&prompter, true, false)).await;

        assert!(matches!(report.status, Status::Cancelled));
        assert_eq!(report.code(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_happens_before_confirm_and_skips_execute() {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([]);
        let mut stub = StubWorkflow::new(vec![]);
        stub.invalid = true;

        let report = run(&mut stub, &fixture.context(&prompter, true, false)).await;

        assert!(matches!(report.status, Status::Failed(AppError::InvalidSelection(_))));
        assert_eq!(report.code(), 1);
        assert!(prompter.asked().is_empty());
        assert_eq!(stub.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declining_confirmation_cancels() {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([Answer::Confirm(false)]);
        let mut stub = StubWorkflow::new(vec![]);

        let report = run(&mut stub, &fixture.context(&prompter, true, false)).await;

        assert!(matches!(report.status, Status::Cancelled));
        assert_eq!(stub.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_destructive_run_without_interaction_needs_yes() {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([]);

        let mut refused = StubWorkflow::new(vec![]);
        let report = run(&mut refused, &fixture.context(&prompter, false, false)).await;
        assert!(matches!(report.status, Status::Failed(AppError::InvalidSelection(_))));
        assert_eq!(refused.executed.load(Ordering::SeqCst), 0);

        let mut forced = StubWorkflow::new(vec![]);
        let report = run(&mut forced, &fixture.context(&prompter, false, true)).await;
        assert!(matches!(report.status, Status::Completed));
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn test_non_destructive_runs_skip_confirmation() {
        let fixture = Fixture::new();
        let prompter = ScriptedPrompter::new([]);
        let mut stub = StubWorkflow::new(vec![]);
        stub.destructive = false;

        let report = run(&mut stub, &fixture.context(&prompter, true, false)).await;

        assert!(matches!(report.status, Status::Completed));
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("clone"), "Clone");
        assert_eq!(capitalize(""), "");
    }
}
