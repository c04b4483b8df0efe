//! `${VAR}` expansion for the YAML settings file.
//!
//! Recognized forms:
//! - `$VAR` and `${VAR}` expand to the variable, which must be set
//! - `${VAR:-fallback}` uses the fallback when VAR is unset or empty
//! - `${VAR-fallback}` uses the fallback only when VAR is unset
//! - `$$` is a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

use crate::error::ConfigError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$\$|\$\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)(?:(?P<op>:?-)(?P<fallback>[^}]*))?\}|\$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("placeholder pattern is valid")
});

/// How a missing or empty variable is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback<'a> {
    Required,
    IfUnset(&'a str),
    IfUnsetOrEmpty(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder<'a> {
    Dollar,
    Var { name: &'a str, fallback: Fallback<'a> },
}

impl<'a> Placeholder<'a> {
    fn from_captures(caps: &Captures<'a>) -> Self {
        if let Some(name) = caps.name("bare") {
            return Placeholder::Var {
                name: name.as_str(),
                fallback: Fallback::Required,
            };
        }

        let Some(name) = caps.name("braced") else {
            return Placeholder::Dollar;
        };

        let fallback_text = caps.name("fallback").map_or("", |m| m.as_str());
        let fallback = match caps.name("op").map(|m| m.as_str()) {
            Some(":-") => Fallback::IfUnsetOrEmpty(fallback_text),
            Some(_) => Fallback::IfUnset(fallback_text),
            None => Fallback::Required,
        };

        Placeholder::Var {
            name: name.as_str(),
            fallback,
        }
    }

    /// Expansion for this placeholder, or a problem description.
    fn expand(self) -> Result<String, String> {
        let Placeholder::Var { name, fallback } = self else {
            return Ok("$".to_string());
        };

        match (env::var(name), fallback) {
            (Ok(value), _) if value.contains(['\n', '\r']) => {
                Err(format!("{name} contains a line break"))
            }
            (Ok(value), Fallback::IfUnsetOrEmpty(text)) if value.is_empty() => Ok(text.to_string()),
            (Ok(value), _) => Ok(value),
            (Err(_), Fallback::IfUnset(text) | Fallback::IfUnsetOrEmpty(text)) => {
                Ok(text.to_string())
            }
            (Err(_), Fallback::Required) => Err(format!("{name} is not set")),
        }
    }
}

/// Expand every placeholder in `input`.
///
/// All problems are collected and reported together.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    let mut problems = Vec::new();

    let expanded = PLACEHOLDER.replace_all(input, |caps: &Captures| {
        match Placeholder::from_captures(caps).expand() {
            Ok(text) => text,
            Err(problem) => {
                problems.push(problem);
                String::new()
            }
        }
    });

    if problems.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(ConfigError::EnvInterpolation {
            message: problems
                .iter()
                .map(|p| format!("  - {p}"))
                .collect::<Vec<_>>()
                .join("\n"),
        })
    }
}
