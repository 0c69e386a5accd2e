//! Hand-written collaborator fakes for unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::config::{AppConfig, Settings};
use crate::errors::{AppError, Result};
use crate::profiles::resolver::{ConnectionParams, RemoteParams};
use crate::profiles::{LocalConnection, Profile, Profiles, RemoteHost};
use crate::utils::database::DatabaseClient;
use crate::utils::process::{CommandOutput, CommandRequest, ProcessRunner};
use crate::utils::prompt::Prompter;
use crate::utils::remote::{RemoteCommand, RemoteExecutor, RemoteOutput};

/// One scripted answer, consumed in order.
#[derive(Debug, Clone)]
pub enum Answer {
    /// Picks the menu entry with this exact label.
    Pick(&'static str),
    /// Escapes out of a menu.
    Escape,
    Confirm(bool),
    Text(&'static str),
}

#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<Answer>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        ScriptedPrompter { answers: Mutex::new(answers.into_iter().collect()), asked: Mutex::default() }
    }

    /// Every prompt title shown so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().unwrap().len()
    }

    fn next(&self, prompt: &str) -> Answer {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted answer left for prompt {:?}", prompt))
    }
}

impl Prompter for ScriptedPrompter {
    fn select(&self, title: &str, items: &[String]) -> Result<Option<usize>> {
        match self.next(title) {
            Answer::Pick(label) => Ok(Some(
                items
                    .iter()
                    .position(|item| item == label)
                    .unwrap_or_else(|| panic!("{:?} is not offered by {:?}: {:?}", label, title, items)),
            )),
            Answer::Escape => Ok(None),
            other => panic!("menu {:?} got {:?}", title, other),
        }
    }

    fn confirm(&self, prompt: &str, _default: bool) -> Result<bool> {
        match self.next(prompt) {
            Answer::Confirm(answer) => Ok(answer),
            other => panic!("confirmation {:?} got {:?}", prompt, other),
        }
    }

    fn input(&self, prompt: &str, _default: Option<&str>) -> Result<String> {
        match self.next(prompt) {
            Answer::Text(text) => Ok(text.to_string()),
            other => panic!("input {:?} got {:?}", prompt, other),
        }
    }

    fn secret(&self, prompt: &str) -> Result<String> {
        self.input(prompt, None)
    }
}

/// Databases per connection name, plus a call log.
#[derive(Debug, Default)]
pub struct FakeDatabase {
    databases: Mutex<BTreeMap<String, BTreeSet<String>>>,
    unreachable: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeDatabase {
    pub fn with(connection: &str, databases: &[&str]) -> Self {
        let fake = FakeDatabase::default();
        fake.databases
            .lock()
            .unwrap()
            .insert(connection.to_string(), databases.iter().map(|d| d.to_string()).collect());
        fake
    }

    pub fn set_unreachable(&self, connection: &str) {
        self.unreachable.lock().unwrap().insert(connection.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String, params: &ConnectionParams) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.unreachable.lock().unwrap().contains(&params.name) {
            return Err(AppError::external(format!("Failed to connect to {}", params.name), "refused"));
        }
        Ok(())
    }

    fn names(&self, params: &ConnectionParams) -> BTreeSet<String> {
        self.databases.lock().unwrap().get(&params.name).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DatabaseClient for FakeDatabase {
    async fn test_connection(&self, params: &ConnectionParams) -> Result<()> {
        self.record(format!("test {}", params.name), params)
    }

    async fn list_databases(&self, params: &ConnectionParams) -> Result<Vec<String>> {
        self.record(format!("list {}", params.name), params)?;
        Ok(self.names(params).into_iter().collect())
    }

    async fn database_exists(&self, params: &ConnectionParams, database: &str) -> Result<bool> {
        self.record(format!("exists {}/{}", params.name, database), params)?;
        Ok(self.names(params).contains(database))
    }

    async fn database_size_mb(&self, params: &ConnectionParams, database: &str) -> Result<f64> {
        self.record(format!("size {}/{}", params.name, database), params)?;
        Ok(4.0)
    }

    async fn recreate_database(&self, params: &ConnectionParams, database: &str) -> Result<()> {
        self.record(format!("recreate {}/{}", params.name, database), params)?;
        self.databases
            .lock()
            .unwrap()
            .entry(params.name.clone())
            .or_default()
            .insert(database.to_string());
        Ok(())
    }
}

/// Records every request; requests with a stdout file get `dump` written to it.
#[derive(Debug)]
pub struct RecordingProcessRunner {
    requests: Mutex<Vec<CommandRequest>>,
    statuses: Mutex<VecDeque<i32>>,
    dump: Mutex<String>,
}

impl Default for RecordingProcessRunner {
    fn default() -> Self {
        RecordingProcessRunner {
            requests: Mutex::default(),
            statuses: Mutex::default(),
            dump: Mutex::new(
                "CREATE TABLE `orders` (`id` int);\n\
                 /*!50013 DEFINER=`admin`@`%` SQL SECURITY DEFINER */\n"
                    .to_string(),
            ),
        }
    }
}

impl RecordingProcessRunner {
    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Exit status for the next run; runs default to 0.
    pub fn push_status(&self, status: i32) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn set_dump(&self, dump: &str) {
        *self.dump.lock().unwrap() = dump.to_string();
    }
}

impl ProcessRunner for RecordingProcessRunner {
    fn ensure_available(&self, _programs: &[&str]) -> Result<()> {
        Ok(())
    }

    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(path) = &request.stdout {
            fs::write(path, self.dump.lock().unwrap().as_bytes()).map_err(|e| AppError::io(path, e))?;
        }
        let status = self.statuses.lock().unwrap().pop_front().unwrap_or(0);
        Ok(CommandOutput { status: Some(status), stdout: String::new(), stderr: String::new() })
    }
}

/// Remote executor answering from a queue of canned outputs.
#[derive(Debug, Default)]
pub struct FakeRemote {
    outputs: Mutex<VecDeque<RemoteOutput>>,
    commands: Mutex<Vec<String>>,
    methods: Mutex<Vec<String>>,
    test_failure: Mutex<Option<String>>,
}

impl FakeRemote {
    pub fn push_output(&self, output: RemoteOutput) {
        self.outputs.lock().unwrap().push_back(output);
    }

    pub fn push_stdout(&self, stdout: &str) {
        self.push_output(RemoteOutput { status: 0, stdout: stdout.to_string(), stderr: String::new() });
    }

    pub fn set_methods(&self, methods: &[&str]) {
        *self.methods.lock().unwrap() = methods.iter().map(|m| m.to_string()).collect();
    }

    pub fn fail_tests_with(&self, reason: &str) {
        *self.test_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Quoted command lines executed so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl RemoteExecutor for FakeRemote {
    fn accepted_methods(&self, host: &str, _port: u16, _username: &str) -> Result<Vec<String>> {
        self.commands.lock().unwrap().push(format!("methods {}", host));
        Ok(self.methods.lock().unwrap().clone())
    }

    fn test(&self, params: &RemoteParams, binary: &str) -> Result<()> {
        self.commands.lock().unwrap().push(format!("test {} {}", params.name, binary));
        match self.test_failure.lock().unwrap().clone() {
            Some(reason) => Err(AppError::external(format!("Connected to {}", params.name), reason)),
            None => Ok(()),
        }
    }

    fn exec(&self, _params: &RemoteParams, command: &RemoteCommand) -> Result<RemoteOutput> {
        self.commands.lock().unwrap().push(command.command_line()?);
        Ok(self.outputs.lock().unwrap().pop_front().unwrap_or_default())
    }
}

pub fn config_in(home: &Path) -> AppConfig {
    AppConfig { home: home.to_path_buf(), settings: Settings::default() }
}

/// Profile "prod" with local connection "db1" and a tested remote "bastion".
pub fn prod_profiles() -> Profiles {
    let mut profile = Profile::default();
    profile.local.insert(
        "db1".to_string(),
        LocalConnection {
            host: "127.0.0.1".to_string(),
            username: "root".to_string(),
            password: "x".to_string(),
            working: true,
            ..Default::default()
        },
    );
    profile.remote.insert(
        "bastion".to_string(),
        RemoteHost {
            host: "bastion.example.com".to_string(),
            username: "deploy".to_string(),
            method: Some("agent".to_string()),
            working: true,
            ..Default::default()
        },
    );

    let mut profiles = Profiles::new();
    profiles.insert("prod".to_string(), profile);
    profiles
}

/// Writes a zip archive holding `files` as (name, content) pairs.
pub fn write_zip(path: &Path, files: &[(&str, &str)]) -> anyhow::Result<()> {
    let mut writer = zip::ZipWriter::new(File::create(path)?);
    for (name, content) in files {
        writer.start_file(*name, zip::write::FileOptions::default())?;
        writer.write_all(content.as_bytes())?;
    }
    writer.finish()?;
    Ok(())
}
