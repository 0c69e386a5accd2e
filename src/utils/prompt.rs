// mysql-helper/src/utils/prompt.rs
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password, Select};

use crate::errors::Result;

/// Interactive questions asked by the workflows and the profile editor.
pub trait Prompter: Send + Sync {
    /// Shows a menu. `None` means the user escaped out of it ("back").
    fn select(&self, title: &str, items: &[String]) -> Result<Option<usize>>;

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;

    /// Free text. An empty answer is allowed and returned as-is.
    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String>;

    /// Free text without echo.
    fn secret(&self, prompt: &str) -> Result<String>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn select(&self, title: &str, items: &[String]) -> Result<Option<usize>> {
        Ok(Select::with_theme(&ColorfulTheme::default())
            .with_prompt(title)
            .items(items)
            .default(0)
            .interact_opt()?)
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        Ok(Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }

    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String> {
        let theme = ColorfulTheme::default();
        let mut input = Input::<String>::with_theme(&theme).with_prompt(prompt).allow_empty(true);
        if let Some(default) = default {
            input = input.default(default.to_string());
        }
        Ok(input.interact_text()?)
    }

    fn secret(&self, prompt: &str) -> Result<String> {
        Ok(Password::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()?)
    }
}
