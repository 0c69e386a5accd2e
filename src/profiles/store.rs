// mysql-helper/src/profiles/store.rs
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{Profile, Profiles, Section, is_valid_name, validate_name};
use crate::errors::{AppError, Result};

/// On-disk profile hierarchy: `<root>/<profile>/{local,remote}.yml`.
///
/// The store holds no cached state; callers load a fresh snapshot with
/// [`ProfileStore::load_all`] and persist each mutation with [`ProfileStore::save`].
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ProfileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile_dir(&self, profile: &str) -> PathBuf {
        self.root.join(profile)
    }

    /// Loads every profile directory. Missing section files are empty mappings.
    pub fn load_all(&self) -> Result<Profiles> {
        let mut profiles = Profiles::new();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(profiles),
            Err(e) => return Err(AppError::io(&self.root, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| AppError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_valid_name(&name) {
                warn!(directory = %path.display(), "Skipping profile directory with an invalid name");
                continue;
            }

            let profile = Profile {
                local: load_section(&path, Section::Local)?,
                remote: load_section(&path, Section::Remote)?,
            };
            profiles.insert(name, profile);
        }

        debug!(count = profiles.len(), root = %self.root.display(), "Loaded profiles");
        Ok(profiles)
    }

    /// Writes one section of a profile, replacing the previous file atomically.
    pub fn save<T: Serialize>(
        &self,
        profile: &str,
        section: Section,
        data: &BTreeMap<String, T>,
    ) -> Result<()> {
        validate_name("Profile", profile)?;
        for key in data.keys() {
            validate_name(section.entry_kind(), key)?;
        }

        let dir = self.profile_dir(profile);
        fs::create_dir_all(&dir).map_err(|e| AppError::io(&dir, e))?;

        let target = dir.join(section.file_name());
        let yaml = serde_yaml::to_string(data)
            .map_err(|source| AppError::Encode { path: target.clone(), source })?;

        // NamedTempFile is created with owner-only permissions, which the
        // persisted file keeps.
        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| AppError::io(&dir, e))?;
        temp.write_all(yaml.as_bytes()).map_err(|e| AppError::io(temp.path(), e))?;
        temp.as_file().sync_all().map_err(|e| AppError::io(temp.path(), e))?;
        temp.persist(&target).map_err(|e| AppError::io(&target, e.error))?;

        debug!(profile, section = %section, path = %target.display(), "Saved profile section");
        Ok(())
    }

    /// Saves the given section of an in-memory profile.
    pub fn save_section(&self, name: &str, profile: &Profile, section: Section) -> Result<()> {
        match section {
            Section::Local => self.save(name, section, &profile.local),
            Section::Remote => self.save(name, section, &profile.remote),
        }
    }

    /// Allocates the profile directory. Creating an existing profile is a no-op.
    pub fn create(&self, profile: &str) -> Result<()> {
        validate_name("Profile", profile)?;
        let dir = self.profile_dir(profile);
        fs::create_dir_all(&dir).map_err(|e| AppError::io(&dir, e))
    }

    /// Removes the whole profile directory. Deleting a missing profile succeeds.
    pub fn delete(&self, profile: &str) -> Result<()> {
        validate_name("Profile", profile)?;
        let dir = self.profile_dir(profile);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::io(&dir, e)),
        }
    }
}

/// Reads one section file of the profile at `dir`. Entries with invalid names
/// are dropped with a warning.
fn load_section<T: DeserializeOwned>(dir: &Path, section: Section) -> Result<BTreeMap<String, T>> {
    let path = dir.join(section.file_name());
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(AppError::io(&path, e)),
    };

    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let mut entries = serde_yaml::from_str::<Option<BTreeMap<String, T>>>(&content)
        .map(Option::unwrap_or_default)
        .map_err(|source| AppError::StoreCorrupt { path: path.clone(), source })?;

    entries.retain(|name, _| {
        let valid = is_valid_name(name);
        if !valid {
            warn!(path = %path.display(), name = %name, "Skipping {} with an invalid name", section.entry_kind().to_lowercase());
        }
        valid
    });
    Ok(entries)
}
