//! Post-update command hooks, configured in `settings.toml`:
//!
//! ```toml
//! [[update]]
//! pattern = "\\.png$"
//! command = "optimize $in"
//! ```
//!
//! `pattern` is a regex tested against the file's forward-slash path; the
//! first matching rule wins. `command` is split on whitespace and the
//! literal token `$in` becomes the file's path.

use std::path::Path;
use std::process::{Child, Command};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize)]
struct Settings {
    #[serde(default)]
    update: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
struct Rule {
    pattern: String,
    command: String,
}

pub struct UpdateHook {
    pattern: Regex,
    tokens: Vec<String>,
}

/// Loads hook rules; a missing settings file means no hooks.
pub fn load(path: &Path) -> Result<Vec<UpdateHook>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    settings
        .update
        .into_iter()
        .map(|rule| {
            let pattern = Regex::new(&rule.pattern)
                .with_context(|| format!("bad hook pattern {:?}", rule.pattern))?;
            Ok(UpdateHook {
                pattern,
                tokens: rule.command.split_whitespace().map(str::to_string).collect(),
            })
        })
        .collect()
}

/// First matching rule's command line with `$in` expanded, or None.
pub fn find_command(hooks: &[UpdateHook], path: &str) -> Option<Vec<String>> {
    hooks.iter().find(|h| h.pattern.is_match(path)).map(|h| {
        h.tokens
            .iter()
            .map(|t| {
                if t == "$in" {
                    path.to_string()
                } else {
                    t.clone()
                }
            })
            .collect()
    })
}

pub fn spawn(tokens: &[String]) -> Result<Child> {
    let (program, args) = tokens.split_first().context("empty hook command")?;
    Command::new(program)
        .args(args)
        .spawn()
        .with_context(|| format!("spawning {program}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hooks_from(text: &str) -> Vec<UpdateHook> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, text).unwrap();
        load(&path).unwrap()
    }

    #[test]
    fn missing_settings_means_no_hooks() {
        let dir = TempDir::new().unwrap();
        assert!(load(&dir.path().join(SETTINGS_FILE)).unwrap().is_empty());
    }

    #[test]
    fn parses_update_table_array() {
        let hooks = hooks_from(
            r#"
[[update]]
pattern = "\\.png$"
command = "touch $in"

[[update]]
pattern = "\\.txt$"
command = "cat $in"
"#,
        );
        assert_eq!(hooks.len(), 2);
    }

    #[test]
    fn first_match_wins() {
        let hooks = hooks_from(
            r#"
[[update]]
pattern = "\\.png$"
command = "first $in"

[[update]]
pattern = "img"
command = "second $in"
"#,
        );
        let cmd = find_command(&hooks, "assets/img.png").unwrap();
        assert_eq!(cmd[0], "first");
    }

    #[test]
    fn dollar_in_is_substituted() {
        let hooks = hooks_from(
            r#"
[[update]]
pattern = "\\.png$"
command = "convert -strip $in"
"#,
        );
        let cmd = find_command(&hooks, "img.png").unwrap();
        assert_eq!(cmd, vec!["convert", "-strip", "img.png"]);
    }

    #[test]
    fn no_match_yields_none() {
        let hooks = hooks_from(
            r#"
[[update]]
pattern = "\\.png$"
command = "touch $in"
"#,
        );
        assert!(find_command(&hooks, "notes.txt").is_none());
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "[[update]]\npattern = \"(\"\ncommand = \"x\"\n").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn spawned_command_runs_to_completion() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("made-by-hook");
        let tokens = vec!["touch".to_string(), target.to_string_lossy().into_owned()];
        let mut child = spawn(&tokens).unwrap();
        assert!(child.wait().unwrap().success());
        assert!(target.exists());
    }
}
