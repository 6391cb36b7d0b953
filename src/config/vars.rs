//! `${VAR}` expansion for config files.
//!
//! - `${VAR}` is replaced with the variable's value; unset is an error
//! - `${VAR:-fallback}` uses `fallback` when VAR is unset or empty
//! - `$$` produces a literal `$`
//!
//! A bare `$` that starts none of these is left as-is.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("placeholder pattern is valid")
});

/// Expand placeholders using `lookup` to resolve variable names.
///
/// Every unresolvable variable is reported, one per line, so a config with
/// several gaps can be fixed in one pass.
pub fn expand<F>(input: &str, lookup: F) -> Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut problems: Vec<String> = Vec::new();

    let expanded = PLACEHOLDER.replace_all(input, |caps: &Captures| {
        let Some(name) = caps.get(1) else {
            return "$".to_string();
        };
        let name = name.as_str();
        let fallback = caps.get(2).map(|m| m.as_str());

        match (lookup(name), fallback) {
            (Some(value), _) if value.contains(['\n', '\r']) => {
                problems.push(format!("variable {name} contains a line break"));
                String::new()
            }
            (Some(value), Some(fallback)) if value.is_empty() => fallback.to_string(),
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.to_string(),
            (None, None) => {
                problems.push(format!("variable {name} is not set"));
                String::new()
            }
        }
    });

    if problems.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(problems.join("\n"))
    }
}

/// Expand placeholders from the process environment.
pub fn expand_env(input: &str) -> Result<String, String> {
    expand(input, |name| std::env::var(name).ok())
}
