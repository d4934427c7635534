//! Turning free-form model output into a `Plan` and a `CodeArtifactSet`.
//!
//! Output is never validated as code: whatever the model returns is
//! materialized and the sandbox decides whether it runs. Text with no
//! recognizable file blocks becomes the language's entry point verbatim.

use std::sync::LazyLock;

use regex::Regex;

use crate::sandbox::Language;
use crate::task::{CodeArtifactSet, Plan, TaskRequest};

static FENCED_BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*```([^\n`]*)\n(.*?)^[ \t]*```[ \t]*$").unwrap()
});

static PATH_TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\./)?[\w-][\w./-]*\.[A-Za-z][A-Za-z0-9]*$").unwrap()
});

static COMPONENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*+]|\d+[.)])\s*(?:\*\*)?component(?:\*\*)?\s*:\s*(?:\*\*)?(.+?)\s*$")
        .unwrap()
});

/// Build a plan from the Architect's answer.
///
/// Components come from `- Component: <name> - <what it does>` lines; when
/// the model ignores that format the list is left empty.
pub fn parse_plan(text: &str, request: &TaskRequest) -> Plan {
    let components = COMPONENT_REGEX
        .captures_iter(text)
        .filter_map(|caps| {
            let raw = caps.get(1)?.as_str();
            let name = raw.split(" - ").next().unwrap_or(raw);
            let name = name.trim_matches(|c: char| c == '*' || c == '`' || c.is_whitespace());
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect();

    Plan {
        components,
        plan_text: text.trim().to_string(),
        target_language: request.language.clone(),
        framework: request.framework.clone(),
    }
}

/// Extract source files from a Coder or Debugger answer.
///
/// A fenced block is named by a path in its info string
/// (`` ```python main.py ``) or, failing that, by a path on the line just
/// above it (`### main.py`). The first unnamed block becomes the entry point;
/// if there are no blocks at all, the whole text does.
pub fn extract_artifacts(text: &str, language: &str) -> CodeArtifactSet {
    let entry_point = Language::parse(language).entry_point();
    let mut artifacts = CodeArtifactSet {
        files: Default::default(),
        raw_text: Some(text.to_string()),
    };
    let mut unnamed: Option<String> = None;

    for caps in FENCED_BLOCK_REGEX.captures_iter(text) {
        let (Some(whole), Some(info), Some(body)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let path = path_from_info(info.as_str())
            .or_else(|| path_from_heading(&text[..whole.start()]));

        match path {
            Some(path) => {
                artifacts.files.insert(path, body.as_str().to_string());
            }
            None if unnamed.is_none() => unnamed = Some(body.as_str().to_string()),
            None => tracing::debug!("Skipping unnamed code block"),
        }
    }

    if let Some(body) = unnamed
        && !artifacts.contains(entry_point)
    {
        artifacts.files.insert(entry_point.to_string(), body);
    }

    if artifacts.is_empty() {
        artifacts.files.insert(entry_point.to_string(), text.to_string());
    }

    artifacts
}

fn path_from_info(info: &str) -> Option<String> {
    info.split(|c: char| c.is_whitespace() || c == ':' || c == '=' || c == '"')
        .find_map(as_path)
}

fn path_from_heading(before: &str) -> Option<String> {
    let line = before.lines().rev().find(|l| !l.trim().is_empty())?;
    if line.len() > 120 || line.trim_start().starts_with("```") {
        return None;
    }
    line.split(|c: char| c.is_whitespace() || matches!(c, '`' | '*' | '#' | ':' | '(' | ')'))
        .find_map(as_path)
}

fn as_path(token: &str) -> Option<String> {
    let token = token.trim();
    if PATH_TOKEN_REGEX.is_match(token) {
        Some(token.trim_start_matches("./").to_string())
    } else {
        None
    }
}
