//! `{{name}}` substitution for command templates.
//!
//! Placeholders look like `{{ name }}` with optional internal whitespace;
//! names match `[A-Za-z0-9_]+`. Unknown names resolve to the empty string.
//! Values are normally passed as positional argv entries, so no quoting is
//! applied; the shell-escape mode exists for command templates that are
//! explicitly routed through a shell.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::config::CommandConfig;
use crate::executor::ResolvedCommand;

/// Static regex for placeholder extraction (compiled once)
static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Variables whose values originate from the caller rather than the operator.
pub const USER_CONTROLLED_VARS: &[&str] = &["prompt"];

/// Characters flagged by [`unsafe_variable_warnings`].
const SHELL_METACHARACTERS: &[char] = &[
    '`', '|', ';', '&', '<', '>', '*', '?', '[', ']', '{', '}', '~', '#', '!', '$', '(', ')',
];

/// Quoting applied to user-controlled variables during substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapeMode {
    /// Values are passed as positional argv entries; no quoting.
    #[default]
    None,
    /// POSIX single-quote user-controlled values for use inside a shell word.
    Shell,
}

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Substitute every placeholder in `template` from `vars`. Unknown names
/// become the empty string, never an error.
pub fn apply(template: &str, vars: &HashMap<String, String>, mode: EscapeMode) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let value = vars.get(name).map(String::as_str).unwrap_or("");
            if mode == EscapeMode::Shell && USER_CONTROLLED_VARS.contains(&name) {
                shell_quote(value)
            } else {
                value.to_string()
            }
        })
        .into_owned()
}

/// Wrap a value in POSIX single quotes, escaping embedded quotes with the
/// `'"'"'` idiom.
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\"'\"'");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Human-readable warnings for user-controlled variables carrying shell
/// metacharacters. Advisory, for operator logs; children are spawned without
/// a shell.
pub fn unsafe_variable_warnings(vars: &HashMap<String, String>) -> Vec<String> {
    let mut warnings = Vec::new();
    for name in USER_CONTROLLED_VARS {
        let Some(value) = vars.get(*name) else {
            continue;
        };
        let found: String = SHELL_METACHARACTERS
            .iter()
            .filter(|c| value.contains(**c))
            .collect();
        if !found.is_empty() {
            warnings.push(format!(
                "variable '{name}' contains shell metacharacters: {found}"
            ));
        }
    }
    warnings
}

/// Resolve a command template into a runnable command: executable, each
/// argument, each env value and the working directory all go through
/// [`apply`].
pub fn resolve_command(
    spec: &CommandConfig,
    vars: &HashMap<String, String>,
    mode: EscapeMode,
) -> ResolvedCommand {
    ResolvedCommand {
        program: apply(&spec.executable, vars, mode),
        args: spec.args.iter().map(|arg| apply(arg, vars, mode)).collect(),
        env: spec
            .env
            .iter()
            .map(|(key, value)| (key.clone(), apply(value, vars, mode)))
            .collect(),
        cwd: spec
            .cwd
            .as_ref()
            .map(|cwd| PathBuf::from(apply(cwd, vars, mode))),
        timeout: Duration::from_millis(spec.timeout_ms),
    }
}
