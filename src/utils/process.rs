// mysql-helper/src/utils/process.rs
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;
use which::which;

use crate::errors::{AppError, Result};

/// Byte count the progress bar should expect for a streamed command.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub label: String,
    pub total_bytes: u64,
}

/// A typed process invocation. Arguments are passed to the program verbatim,
/// never through a shell, so no quoting is involved.
#[derive(Clone, PartialEq, Default)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// File streamed into the child's stdin.
    pub stdin: Option<PathBuf>,
    /// File receiving the child's stdout instead of capturing it.
    pub stdout: Option<PathBuf>,
    pub progress: Option<Progress>,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>) -> Self {
        CommandRequest { program: program.into(), ..Default::default() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn with_progress(mut self, label: impl Into<String>, total_bytes: u64) -> Self {
        self.progress = Some(Progress { label: label.into(), total_bytes });
        self
    }

    /// Program and arguments joined for log output. Environment values are omitted.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| shlex::try_quote(part).map(|q| q.into_owned()).unwrap_or_else(|_| part.to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandRequest")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("progress", &self.progress)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes external programs on behalf of the workflows.
pub trait ProcessRunner: Send + Sync {
    /// Fails when any of `programs` cannot be found.
    fn ensure_available(&self, programs: &[&str]) -> Result<()>;

    fn run(&self, request: &CommandRequest) -> Result<CommandOutput>;
}

/// Runs `request` and turns a non-zero exit into an `ExternalFailure`.
pub fn run_checked(runner: &dyn ProcessRunner, request: &CommandRequest) -> Result<CommandOutput> {
    let output = runner.run(request)?;
    if !output.success() {
        let status = output.status.map_or_else(|| "signal".to_string(), |code| code.to_string());
        return Err(AppError::external(
            format!("{} exited with status {}", request.program, status),
            output.stderr.trim(),
        ));
    }
    Ok(output)
}

/// Runs programs found on `PATH`, drawing progress bars on stderr.
#[derive(Debug, Clone)]
pub struct SystemProcessRunner {
    pub show_progress: bool,
}

impl SystemProcessRunner {
    pub fn new(show_progress: bool) -> Self {
        SystemProcessRunner { show_progress }
    }

    fn progress_bar(&self, progress: Option<&Progress>) -> ProgressBar {
        match progress {
            Some(progress) if self.show_progress => {
                let bar = ProgressBar::new(progress.total_bytes.max(1));
                let style = ProgressStyle::with_template(
                    "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style.progress_chars("=> "));
                bar.set_message(progress.label.clone());
                bar
            }
            _ => ProgressBar::hidden(),
        }
    }
}

pub fn find_executable(program: &str) -> Result<PathBuf> {
    which(program).map_err(|e| {
        AppError::external(
            format!(
                "{} executable not found in PATH. Please ensure the MySQL client tools are installed and in your PATH",
                program
            ),
            e,
        )
    })
}

fn create_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))
        }
        _ => Ok(()),
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn ensure_available(&self, programs: &[&str]) -> Result<()> {
        for program in programs {
            find_executable(program)?;
        }
        Ok(())
    }

    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        let program_path = find_executable(&request.program)?;
        debug!(command = %request.display_line(), "Running external command");

        let stdin_file = match &request.stdin {
            Some(path) => Some(File::open(path).map_err(|e| AppError::io(path, e))?),
            None => None,
        };
        let stdout_file = match &request.stdout {
            Some(path) => {
                create_parent_dir(path)?;
                Some(File::create(path).map_err(|e| AppError::io(path, e))?)
            }
            None => None,
        };

        let mut child = Command::new(&program_path)
            .args(&request.args)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin_file.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::external(format!("Failed to start {}", request.program), e))?;

        let bar = self.progress_bar(request.progress.as_ref());

        // stdin is fed and stderr drained on their own threads so that a child
        // blocked on one pipe cannot stall the others.
        let feeder = match (stdin_file, child.stdin.take()) {
            (Some(file), Some(mut child_stdin)) => {
                let mut reader = bar.wrap_read(file);
                Some(thread::spawn(move || -> io::Result<u64> {
                    let copied = io::copy(&mut reader, &mut child_stdin)?;
                    child_stdin.flush()?;
                    Ok(copied)
                }))
            }
            _ => None,
        };

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer);
                buffer
            })
        });

        let mut stdout_text = String::new();
        let drained = match (child.stdout.take(), stdout_file) {
            (Some(child_stdout), Some(file)) => {
                let mut reader = if feeder.is_some() { ProgressBar::hidden() } else { bar.clone() }
                    .wrap_read(child_stdout);
                let mut writer = BufWriter::new(file);
                io::copy(&mut reader, &mut writer)
                    .and_then(|_| writer.flush())
                    .map_err(|e| AppError::io(request.stdout.as_deref().unwrap_or(Path::new("-")), e))
            }
            (Some(mut child_stdout), None) => child_stdout
                .read_to_string(&mut stdout_text)
                .map(|_| ())
                .map_err(|e| AppError::external(format!("Failed to read output of {}", request.program), e)),
            (None, _) => Ok(()),
        };

        // Nobody reads the child's output any more; stop it so it can be reaped.
        if drained.is_err() {
            if let Err(e) = child.kill() {
                debug!(error = %e, program = %request.program, "Failed to kill child process");
            }
        }

        let status = child
            .wait()
            .map_err(|e| AppError::external(format!("Failed to wait for {}", request.program), e))?;

        if let Some(feeder) = feeder {
            match feeder.join() {
                Ok(Ok(bytes)) => debug!(bytes, program = %request.program, "Streamed input"),
                // A child that exits early closes its stdin; its status tells the story.
                Ok(Err(e)) => debug!(error = %e, program = %request.program, "Input stream ended early"),
                Err(_) => return Err(AppError::external("Input streaming thread panicked", &request.program)),
            }
        }
        bar.finish_and_clear();

        let stderr = stderr_reader.and_then(|handle| handle.join().ok()).unwrap_or_default();
        drained?;

        Ok(CommandOutput { status: status.code(), stdout: stdout_text, stderr })
    }
}
