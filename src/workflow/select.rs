// mysql-helper/src/workflow/select.rs
use crate::errors::{AppError, Result};
use crate::profiles::resolver::{ConnectionParams, RemoteParams, resolve_local, resolve_remote};
use crate::profiles::{find_profile, is_safe_database_name, sanitize_database_name};

use super::{Context, Step};

pub const NEW_DATABASE_LABEL: &str = "[ New database ]";

/// A selected value and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum Choice<T> {
    Answered(T),
    Given(T),
    Back,
}

impl<T> Choice<T> {
    /// Stores the value (if any) and returns the matching stage step.
    pub fn store(self, slot: &mut Option<T>) -> Step {
        match self {
            Choice::Answered(value) => {
                *slot = Some(value);
                Step::Answered
            }
            Choice::Given(value) => {
                *slot = Some(value);
                Step::Given
            }
            Choice::Back => Step::Back,
        }
    }
}

/// A destination database that may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDatabase {
    pub name: String,
    pub exists: bool,
}

pub fn missing_flag(flag: &str) -> AppError {
    AppError::invalid(format!("--{} is required when running without interaction", flag))
}

/// Returns the value selected so far, or an error if the stage never ran.
pub fn selected<'a, T>(slot: &'a Option<T>, what: &str) -> Result<&'a T> {
    slot.as_ref().ok_or_else(|| AppError::invalid(format!("No {} has been selected", what)))
}

/// Picks one of `names`: the flag value when given (which must be listed), else a menu.
pub fn choose_name(
    cx: &Context<'_>,
    kind: &str,
    flag: &str,
    value: Option<&str>,
    names: &[String],
    title: &str,
) -> Result<Choice<String>> {
    if let Some(value) = value {
        let wanted = value.trim();
        return names
            .iter()
            .find(|name| name.as_str() == wanted)
            .map(|name| Choice::Given(name.clone()))
            .ok_or_else(|| AppError::invalid(format!("{} '{}' does not exist", kind, wanted)));
    }
    if !cx.interactive {
        return Err(missing_flag(flag));
    }
    if names.is_empty() {
        return Err(AppError::invalid(format!("There is no {} to choose from", kind.to_lowercase())));
    }

    match cx.prompter.select(title, names)? {
        Some(index) => names
            .get(index)
            .map(|name| Choice::Answered(name.clone()))
            .ok_or_else(|| AppError::invalid(format!("Menu returned unknown entry {}", index))),
        None => Ok(Choice::Back),
    }
}

pub fn profile(cx: &Context<'_>, value: Option<&str>) -> Result<Choice<String>> {
    if cx.profiles.is_empty() && value.is_none() {
        return Err(AppError::invalid("No profiles configured; run `mysql-helper configure` first"));
    }
    let names: Vec<String> = cx.profiles.keys().cloned().collect();
    let value = value.map(str::to_lowercase);
    choose_name(cx, "Profile", "profile", value.as_deref(), &names, "Select profile")
}

pub fn local_connection(
    cx: &Context<'_>,
    profile: &str,
    flag: &str,
    value: Option<&str>,
    title: &str,
) -> Result<Choice<ConnectionParams>> {
    let names: Vec<String> = find_profile(cx.profiles, profile)?.local.keys().cloned().collect();
    match choose_name(cx, "Local connection", flag, value, &names, title)? {
        Choice::Answered(name) => Ok(Choice::Answered(resolve_local(cx.profiles, profile, &name)?)),
        Choice::Given(name) => Ok(Choice::Given(resolve_local(cx.profiles, profile, &name)?)),
        Choice::Back => Ok(Choice::Back),
    }
}

pub fn remote(cx: &Context<'_>, profile: &str, value: Option<&str>) -> Result<Choice<RemoteParams>> {
    let names: Vec<String> = find_profile(cx.profiles, profile)?.remote.keys().cloned().collect();
    match choose_name(cx, "Remote", "remote", value, &names, "Select remote")? {
        Choice::Answered(name) => Ok(Choice::Answered(resolve_remote(cx.profiles, profile, &name)?)),
        Choice::Given(name) => Ok(Choice::Given(resolve_remote(cx.profiles, profile, &name)?)),
        Choice::Back => Ok(Choice::Back),
    }
}

/// A database that must already exist on `params`.
pub async fn existing_database(
    cx: &Context<'_>,
    params: &ConnectionParams,
    flag: &str,
    value: Option<&str>,
    title: &str,
) -> Result<Choice<String>> {
    if value.is_none() && !cx.interactive {
        return Err(missing_flag(flag));
    }
    let databases = cx.databases.list_databases(params).await?;
    choose_name(cx, "Database", flag, value, &databases, title)
}

/// An existing database or a new name. Interactive new names are sanitised to
/// `[a-z0-9_]`; an answer that sanitises to nothing returns to the menu.
pub async fn target_database(
    cx: &Context<'_>,
    params: &ConnectionParams,
    flag: &str,
    value: Option<&str>,
    title: &str,
) -> Result<Choice<TargetDatabase>> {
    if let Some(value) = value {
        let name = value.trim();
        if !is_safe_database_name(name) {
            return Err(AppError::invalid(format!("Database name '{}' is not valid", name)));
        }
        let exists = cx.databases.database_exists(params, name).await?;
        return Ok(Choice::Given(TargetDatabase { name: name.to_string(), exists }));
    }
    if !cx.interactive {
        return Err(missing_flag(flag));
    }

    let databases = cx.databases.list_databases(params).await?;
    let mut items = vec![NEW_DATABASE_LABEL.to_string()];
    items.extend(databases.iter().cloned());

    loop {
        let Some(index) = cx.prompter.select(title, &items)? else {
            return Ok(Choice::Back);
        };
        if index > 0 {
            let name = items
                .get(index)
                .cloned()
                .ok_or_else(|| AppError::invalid(format!("Menu returned unknown entry {}", index)))?;
            return Ok(Choice::Answered(TargetDatabase { name, exists: true }));
        }

        let name = sanitize_database_name(&cx.prompter.input("New database name", None)?);
        if name.is_empty() {
            continue;
        }
        let exists = databases.contains(&name);
        return Ok(Choice::Answered(TargetDatabase { name, exists }));
    }
}
