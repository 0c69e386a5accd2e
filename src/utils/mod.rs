pub mod database;
pub mod process;
pub mod prompt;
pub mod remote;

use std::path::PathBuf;

pub use process::find_executable;

/// Client programs every dump or import needs.
pub const REQUIRED_TOOLS: &[&str] = &["mysqldump", "mysql"];

/// Looks up each required tool, returning its path or the lookup failure.
pub fn check_required_tools() -> Vec<(&'static str, crate::errors::Result<PathBuf>)> {
    REQUIRED_TOOLS.iter().map(|tool| (*tool, find_executable(tool))).collect()
}
