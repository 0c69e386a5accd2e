//! Interactive profile editor.
//!
//! The editor is a small state machine over a stack of screens. Escaping a
//! menu (or choosing "Back") pops the current screen; the session ends when
//! the profile list itself is popped. Every change is written to the store as
//! soon as it is made.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::config::{Settings, expand_home};
use crate::errors::{AppError, Result};
use crate::profiles::resolver::{DEFAULT_HOST, DEFAULT_MYSQL_PORT, DEFAULT_SSH_PORT, resolve_local, resolve_remote};
use crate::profiles::store::ProfileStore;
use crate::profiles::{LocalConnection, Profile, Profiles, RemoteHost, Section, sanitize_name};
use crate::utils::database::DatabaseClient;
use crate::utils::prompt::Prompter;
use crate::utils::remote::RemoteExecutor;

pub const CREATE_PROFILE_LABEL: &str = "[ Create new profile ]";
pub const ADD_LOCAL_LABEL: &str = "[ Add local connection ]";
pub const ADD_REMOTE_LABEL: &str = "[ Add remote host ]";

const BACK: &str = "Back";
const REMOTE_HOSTS: &str = "Remote hosts";
const LOCAL_DATABASES: &str = "Local databases";
const REMOVE_PROFILE: &str = "Remove profile";

const EDIT_HOST: &str = "Edit host";
const EDIT_PORT: &str = "Edit port";
const EDIT_USERNAME: &str = "Edit username";
const EDIT_PASSWORD: &str = "Edit password";
const CHOOSE_METHOD: &str = "Choose method";
const RELOAD_METHODS: &str = "Reload methods";
const EDIT_PUBLIC_KEY: &str = "Edit public key";
const EDIT_PRIVATE_KEY: &str = "Edit private key";
const EDIT_PASSPHRASE: &str = "Edit passphrase";
const TEST_CONNECTION: &str = "Test connection";
const RENAME: &str = "Rename";
const REMOVE: &str = "Remove";

/// Authentication methods the SSH executor can use.
pub const SUPPORTED_METHODS: [&str; 4] = ["agent", "publickey", "password", "none"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Screen {
    ProfileList,
    Profile(String),
    LocalList(String),
    LocalDetail { profile: String, name: String },
    RemoteList(String),
    RemoteDetail { profile: String, name: String },
}

enum Nav {
    Stay,
    Push(Screen),
    Replace(Screen),
    Pop,
}

/// Fails unless prompts can be shown.
pub fn require_terminal(interactive: bool) -> Result<()> {
    if interactive {
        Ok(())
    } else {
        Err(AppError::invalid("configure is interactive and cannot run with --no-interaction"))
    }
}

/// Validates a key path answer. Empty clears the setting; anything else must
/// name an existing file (`~` is expanded).
pub fn key_path_answer(answer: &str) -> Result<Option<String>> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(None);
    }
    if !expand_home(Path::new(answer)).is_file() {
        return Err(AppError::invalid(format!("Key file {} does not exist", answer)));
    }
    Ok(Some(answer.to_string()))
}

fn rename_key<T>(map: &mut BTreeMap<String, T>, from: &str, to: &str) -> bool {
    if map.contains_key(to) {
        return false;
    }
    match map.remove(from) {
        Some(value) => {
            map.insert(to.to_string(), value);
            true
        }
        None => false,
    }
}

fn status(working: bool) -> &'static str {
    if working { "working" } else { "untested" }
}

pub struct Configurator<'a> {
    store: &'a ProfileStore,
    profiles: Profiles,
    settings: &'a Settings,
    prompter: &'a dyn Prompter,
    databases: &'a dyn DatabaseClient,
    remotes: &'a dyn RemoteExecutor,
}

impl<'a> Configurator<'a> {
    pub fn new(
        store: &'a ProfileStore,
        profiles: Profiles,
        settings: &'a Settings,
        prompter: &'a dyn Prompter,
        databases: &'a dyn DatabaseClient,
        remotes: &'a dyn RemoteExecutor,
    ) -> Self {
        Configurator { store, profiles, settings, prompter, databases, remotes }
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut stack = vec![Screen::ProfileList];
        while let Some(screen) = stack.last().cloned() {
            let nav = match screen {
                Screen::ProfileList => self.profile_list()?,
                Screen::Profile(profile) => self.profile_menu(&profile)?,
                Screen::LocalList(profile) => self.local_list(&profile)?,
                Screen::LocalDetail { profile, name } => self.local_detail(&profile, &name).await?,
                Screen::RemoteList(profile) => self.remote_list(&profile)?,
                Screen::RemoteDetail { profile, name } => self.remote_detail(&profile, &name)?,
            };
            match nav {
                Nav::Stay => {}
                Nav::Push(next) => stack.push(next),
                Nav::Replace(next) => {
                    stack.pop();
                    stack.push(next);
                }
                Nav::Pop => {
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    fn choose(&self, title: &str, items: Vec<String>) -> Result<Option<String>> {
        Ok(self.prompter.select(title, &items)?.and_then(|index| items.get(index).cloned()))
    }

    fn choose_action(&self, title: &str, actions: &[&str]) -> Result<Option<String>> {
        self.choose(title, actions.iter().map(|a| a.to_string()).collect())
    }

    /// Asks for a new entry name. Returns `None` (after saying why) when the
    /// answer is empty, unchanged or already taken.
    fn ask_name(&self, prompt: &str, current: Option<&str>, taken: &[String]) -> Result<Option<String>> {
        let name = sanitize_name(&self.prompter.input(prompt, current)?);
        if name.is_empty() || Some(name.as_str()) == current {
            return Ok(None);
        }
        if taken.contains(&name) {
            eprintln!("⚠️  {} already exists.", name);
            return Ok(None);
        }
        Ok(Some(name))
    }

    fn profile_mut(&mut self, profile: &str) -> Result<&mut Profile> {
        self.profiles
            .get_mut(profile)
            .ok_or_else(|| AppError::not_found("Profile", profile))
    }

    fn persist(&self, profile: &str, section: Section) -> Result<()> {
        let record = self
            .profiles
            .get(profile)
            .ok_or_else(|| AppError::not_found("Profile", profile))?;
        self.store.save_section(profile, record, section)
    }

    fn update_local(&mut self, profile: &str, name: &str, edit: impl FnOnce(&mut LocalConnection)) -> Result<()> {
        let record = self
            .profile_mut(profile)?
            .local
            .get_mut(name)
            .ok_or_else(|| AppError::not_found("Local connection", format!("{}/{}", profile, name)))?;
        edit(record);
        self.persist(profile, Section::Local)
    }

    fn update_remote(&mut self, profile: &str, name: &str, edit: impl FnOnce(&mut RemoteHost)) -> Result<()> {
        let record = self
            .profile_mut(profile)?
            .remote
            .get_mut(name)
            .ok_or_else(|| AppError::not_found("Remote", format!("{}/{}", profile, name)))?;
        edit(record);
        self.persist(profile, Section::Remote)
    }

    fn profile_list(&mut self) -> Result<Nav> {
        let mut items: Vec<String> = self.profiles.keys().cloned().collect();
        items.push(CREATE_PROFILE_LABEL.to_string());

        let Some(choice) = self.choose("Select profile to configure", items)? else {
            return Ok(Nav::Pop);
        };
        if choice != CREATE_PROFILE_LABEL {
            return Ok(Nav::Push(Screen::Profile(choice)));
        }

        let taken: Vec<String> = self.profiles.keys().cloned().collect();
        let Some(name) = self.ask_name("Profile name", None, &taken)? else {
            return Ok(Nav::Stay);
        };
        self.store.create(&name)?;
        self.profiles.insert(name.clone(), Profile::default());
        info!(profile = %name, "Created profile");
        Ok(Nav::Push(Screen::Profile(name)))
    }

    fn profile_menu(&mut self, profile: &str) -> Result<Nav> {
        let title = format!("Profile {}", profile);
        let choice = self.choose_action(&title, &[REMOTE_HOSTS, LOCAL_DATABASES, REMOVE_PROFILE, BACK])?;
        match choice.as_deref() {
            Some(REMOTE_HOSTS) => Ok(Nav::Push(Screen::RemoteList(profile.to_string()))),
            Some(LOCAL_DATABASES) => Ok(Nav::Push(Screen::LocalList(profile.to_string()))),
            Some(REMOVE_PROFILE) => {
                let question = format!("Delete profile {} and all of its connections?", profile);
                if !self.prompter.confirm(&question, false)? {
                    return Ok(Nav::Stay);
                }
                self.store.delete(profile)?;
                self.profiles.remove(profile);
                info!(profile, "Deleted profile");
                eprintln!("🗑  Profile {} deleted.", profile);
                Ok(Nav::Pop)
            }
            _ => Ok(Nav::Pop),
        }
    }

    fn local_list(&mut self, profile: &str) -> Result<Nav> {
        let names: Vec<String> = self.profile_mut(profile)?.local.keys().cloned().collect();
        let mut items = names.clone();
        items.push(ADD_LOCAL_LABEL.to_string());
        items.push(BACK.to_string());

        let choice = self.choose(&format!("Local databases in {}", profile), items)?;
        match choice.as_deref() {
            None | Some(BACK) => Ok(Nav::Pop),
            Some(ADD_LOCAL_LABEL) => {
                let Some(name) = self.ask_name("Connection name", None, &names)? else {
                    return Ok(Nav::Stay);
                };
                let record = LocalConnection { host: DEFAULT_HOST.to_string(), ..Default::default() };
                self.profile_mut(profile)?.local.insert(name.clone(), record);
                self.persist(profile, Section::Local)?;
                Ok(Nav::Push(Screen::LocalDetail { profile: profile.to_string(), name }))
            }
            Some(name) => Ok(Nav::Push(Screen::LocalDetail { profile: profile.to_string(), name: name.to_string() })),
        }
    }

    async fn local_detail(&mut self, profile: &str, name: &str) -> Result<Nav> {
        let Some(record) = self.profile_mut(profile)?.local.get(name).cloned() else {
            return Ok(Nav::Pop);
        };
        let title = format!(
            "{}/{}: {}@{}:{} [{}]",
            profile,
            name,
            record.username,
            record.host,
            record.port.unwrap_or(DEFAULT_MYSQL_PORT),
            status(record.working)
        );
        let actions = [EDIT_HOST, EDIT_PORT, EDIT_USERNAME, EDIT_PASSWORD, TEST_CONNECTION, RENAME, REMOVE, BACK];

        match self.choose_action(&title, &actions)?.as_deref() {
            Some(EDIT_HOST) => {
                let host = self.prompter.input("Host", Some(&record.host))?.trim().to_string();
                if !host.is_empty() {
                    self.update_local(profile, name, |r| {
                        r.host = host;
                        r.working = false;
                    })?;
                }
            }
            Some(EDIT_PORT) => {
                let current = record.port.unwrap_or(DEFAULT_MYSQL_PORT).to_string();
                if let Some(port) = self.ask_port(&current)? {
                    self.update_local(profile, name, |r| {
                        r.port = Some(port);
                        r.working = false;
                    })?;
                }
            }
            Some(EDIT_USERNAME) => {
                let username = self.prompter.input("Username", Some(&record.username))?.trim().to_string();
                self.update_local(profile, name, |r| {
                    r.username = username;
                    r.working = false;
                })?;
            }
            Some(EDIT_PASSWORD) => {
                let password = self.prompter.secret("Password")?;
                self.update_local(profile, name, |r| {
                    r.password = password;
                    r.working = false;
                })?;
            }
            Some(TEST_CONNECTION) => {
                let params = resolve_local(&self.profiles, profile, name)?;
                let working = match self.databases.test_connection(&params).await {
                    Ok(()) => {
                        eprintln!("✅ Connected to {} as {}.", params.host, params.username);
                        true
                    }
                    Err(e) => {
                        eprintln!("❌ {}", e);
                        false
                    }
                };
                self.update_local(profile, name, |r| r.working = working)?;
            }
            Some(RENAME) => {
                let taken: Vec<String> = self.profile_mut(profile)?.local.keys().cloned().collect();
                if let Some(new_name) = self.ask_name("New name", Some(name), &taken)? {
                    rename_key(&mut self.profile_mut(profile)?.local, name, &new_name);
                    self.persist(profile, Section::Local)?;
                    return Ok(Nav::Replace(Screen::LocalDetail { profile: profile.to_string(), name: new_name }));
                }
            }
            Some(REMOVE) => {
                if self.prompter.confirm(&format!("Remove local connection {}?", name), false)? {
                    self.profile_mut(profile)?.local.remove(name);
                    self.persist(profile, Section::Local)?;
                    return Ok(Nav::Pop);
                }
            }
            _ => return Ok(Nav::Pop),
        }
        Ok(Nav::Stay)
    }

    fn ask_port(&self, current: &str) -> Result<Option<u16>> {
        let answer = self.prompter.input("Port", Some(current))?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(None);
        }
        match answer.parse::<u16>() {
            Ok(port) if port > 0 => Ok(Some(port)),
            _ => {
                eprintln!("⚠️  {:?} is not a valid port.", answer);
                Ok(None)
            }
        }
    }

    fn remote_list(&mut self, profile: &str) -> Result<Nav> {
        let names: Vec<String> = self.profile_mut(profile)?.remote.keys().cloned().collect();
        let mut items = names.clone();
        items.push(ADD_REMOTE_LABEL.to_string());
        items.push(BACK.to_string());

        let choice = self.choose(&format!("Remote hosts in {}", profile), items)?;
        match choice.as_deref() {
            None | Some(BACK) => Ok(Nav::Pop),
            Some(ADD_REMOTE_LABEL) => {
                let Some(name) = self.ask_name("Remote name", None, &names)? else {
                    return Ok(Nav::Stay);
                };
                self.profile_mut(profile)?.remote.insert(name.clone(), RemoteHost::default());
                self.persist(profile, Section::Remote)?;
                Ok(Nav::Push(Screen::RemoteDetail { profile: profile.to_string(), name }))
            }
            Some(name) => Ok(Nav::Push(Screen::RemoteDetail { profile: profile.to_string(), name: name.to_string() })),
        }
    }

    fn remote_detail(&mut self, profile: &str, name: &str) -> Result<Nav> {
        let Some(record) = self.profile_mut(profile)?.remote.get(name).cloned() else {
            return Ok(Nav::Pop);
        };
        let title = format!(
            "{}/{}: {}@{}:{} via {} [{}]",
            profile,
            name,
            record.username,
            record.host,
            record.port.unwrap_or(DEFAULT_SSH_PORT),
            record.method.as_deref().unwrap_or("no method"),
            status(record.working)
        );
        let actions = [
            EDIT_HOST,
            EDIT_PORT,
            EDIT_USERNAME,
            CHOOSE_METHOD,
            RELOAD_METHODS,
            EDIT_PASSWORD,
            EDIT_PUBLIC_KEY,
            EDIT_PRIVATE_KEY,
            EDIT_PASSPHRASE,
            TEST_CONNECTION,
            RENAME,
            REMOVE,
            BACK,
        ];

        match self.choose_action(&title, &actions)?.as_deref() {
            Some(EDIT_HOST) => {
                let host = self.prompter.input("Host", Some(&record.host))?.trim().to_string();
                if !host.is_empty() {
                    self.update_remote(profile, name, |r| {
                        r.host = host;
                        r.working = false;
                    })?;
                }
            }
            Some(EDIT_PORT) => {
                let current = record.port.unwrap_or(DEFAULT_SSH_PORT).to_string();
                if let Some(port) = self.ask_port(&current)? {
                    self.update_remote(profile, name, |r| {
                        r.port = Some(port);
                        r.working = false;
                    })?;
                }
            }
            Some(EDIT_USERNAME) => {
                let username = self.prompter.input("Username", Some(&record.username))?.trim().to_string();
                self.update_remote(profile, name, |r| {
                    r.username = username;
                    r.working = false;
                })?;
            }
            Some(CHOOSE_METHOD) => {
                let offered: Vec<String> = if record.methods.is_empty() {
                    SUPPORTED_METHODS.iter().map(|m| m.to_string()).collect()
                } else {
                    record
                        .methods
                        .iter()
                        .filter(|m| SUPPORTED_METHODS.contains(&m.as_str()))
                        .cloned()
                        .collect()
                };
                if let Some(method) = self.choose("Authentication method", offered)? {
                    self.update_remote(profile, name, |r| {
                        r.method = Some(method);
                        r.working = false;
                    })?;
                }
            }
            Some(RELOAD_METHODS) => {
                if record.host.trim().is_empty() {
                    eprintln!("⚠️  Set a host before probing authentication methods.");
                } else {
                    let port = record.port.unwrap_or(DEFAULT_SSH_PORT);
                    match self.remotes.accepted_methods(record.host.trim(), port, &record.username) {
                        Ok(methods) => {
                            eprintln!("🔑 {} accepts: {}", record.host, methods.join(", "));
                            self.update_remote(profile, name, |r| r.methods = methods)?;
                        }
                        Err(e) => eprintln!("❌ {}", e),
                    }
                }
            }
            Some(EDIT_PASSWORD) => {
                let password = self.prompter.secret("Password")?;
                self.update_remote(profile, name, |r| {
                    r.password = Some(password).filter(|p| !p.is_empty());
                    r.working = false;
                })?;
            }
            Some(EDIT_PUBLIC_KEY) => {
                if let Some(path) = self.ask_key_path("Public key path", record.public_key.as_deref())? {
                    self.update_remote(profile, name, |r| {
                        r.public_key = path;
                        r.working = false;
                    })?;
                }
            }
            Some(EDIT_PRIVATE_KEY) => {
                if let Some(path) = self.ask_key_path("Private key path", record.private_key.as_deref())? {
                    self.update_remote(profile, name, |r| {
                        r.private_key = path;
                        r.working = false;
                    })?;
                }
            }
            Some(EDIT_PASSPHRASE) => {
                let passphrase = self.prompter.secret("Key passphrase")?;
                self.update_remote(profile, name, |r| {
                    r.passphrase = Some(passphrase).filter(|p| !p.is_empty());
                    r.working = false;
                })?;
            }
            Some(TEST_CONNECTION) => self.test_remote(profile, name)?,
            Some(RENAME) => {
                let taken: Vec<String> = self.profile_mut(profile)?.remote.keys().cloned().collect();
                if let Some(new_name) = self.ask_name("New name", Some(name), &taken)? {
                    rename_key(&mut self.profile_mut(profile)?.remote, name, &new_name);
                    self.persist(profile, Section::Remote)?;
                    return Ok(Nav::Replace(Screen::RemoteDetail { profile: profile.to_string(), name: new_name }));
                }
            }
            Some(REMOVE) => {
                if self.prompter.confirm(&format!("Remove remote host {}?", name), false)? {
                    self.profile_mut(profile)?.remote.remove(name);
                    self.persist(profile, Section::Remote)?;
                    return Ok(Nav::Pop);
                }
            }
            _ => return Ok(Nav::Pop),
        }
        Ok(Nav::Stay)
    }

    /// `Some(None)` clears the path; `None` leaves it unchanged.
    fn ask_key_path(&self, prompt: &str, current: Option<&str>) -> Result<Option<Option<String>>> {
        let answer = self.prompter.input(prompt, current)?;
        match key_path_answer(&answer) {
            Ok(path) => Ok(Some(path)),
            Err(e) => {
                eprintln!("⚠️  {}", e);
                Ok(None)
            }
        }
    }

    /// Authenticates and looks for the helper binary on the remote, recording
    /// the outcome. Offers to retry after a failure.
    fn test_remote(&mut self, profile: &str, name: &str) -> Result<()> {
        loop {
            let params = match resolve_remote(&self.profiles, profile, name) {
                Ok(params) => params,
                Err(e) => {
                    eprintln!("❌ {}", e);
                    return Ok(());
                }
            };

            eprintln!("🔌 Testing {}...", params.address());
            let outcome = self.remotes.test(&params, &self.settings.remote_binary);
            let working = outcome.is_ok();
            self.update_remote(profile, name, |r| r.working = working)?;

            match outcome {
                Ok(()) => {
                    eprintln!("✅ {} is reachable and has {} installed.", params.address(), self.settings.remote_binary);
                    return Ok(());
                }
                Err(e) => {
                    eprintln!("❌ {}", e);
                    if !self.prompter.confirm("Test again?", true)? {
                        return Ok(());
                    }
                }
            }
        }
    }
}
