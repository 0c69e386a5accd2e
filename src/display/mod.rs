// mysql-helper/src/display/mod.rs
use crate::errors::{AppError, Result};
use crate::workflow::Context;
use crate::workflow::select::{self, Choice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DisplaySource {
    Profiles,
    Connections,
    Databases,
}

#[derive(Debug, Clone)]
pub struct DisplayOptions {
    pub source: DisplaySource,
    pub profile: Option<String>,
    pub connection: Option<String>,
    pub json: bool,
}

/// Names for `display`, or `None` when the user escaped a menu.
pub async fn list(cx: &Context<'_>, options: &DisplayOptions) -> Result<Option<Vec<String>>> {
    if options.source == DisplaySource::Profiles {
        return Ok(Some(cx.profiles.keys().cloned().collect()));
    }

    let profile = match select::profile(cx, options.profile.as_deref())? {
        Choice::Answered(profile) | Choice::Given(profile) => profile,
        Choice::Back => return Ok(None),
    };

    if options.source == DisplaySource::Connections {
        let profile = crate::profiles::find_profile(cx.profiles, &profile)?;
        return Ok(Some(profile.local.keys().cloned().collect()));
    }

    let params = match select::local_connection(
        cx,
        &profile,
        "connection",
        options.connection.as_deref(),
        "Select local connection",
    )? {
        Choice::Answered(params) | Choice::Given(params) => params,
        Choice::Back => return Ok(None),
    };
    cx.databases.list_databases(&params).await.map(Some)
}

/// One name per line, or a JSON array.
pub fn render(names: &[String], json: bool) -> Result<String> {
    if json {
        serde_json::to_string(names).map_err(|e| AppError::external("Failed to encode listing as JSON", e))
    } else {
        Ok(names.join("\n"))
    }
}

pub async fn run_display(cx: &Context<'_>, options: &DisplayOptions) -> Result<()> {
    if let Some(names) = list(cx, options).await? {
        let output = render(&names, options.json)?;
        if !output.is_empty() {
            println!("{}", output);
        }
    }
    Ok(())
}
