use std::fmt;

use crate::task::{CodeArtifactSet, ExecutionMode};

/// Languages the sandbox image carries a toolchain for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    /// Anything else. Runs in degraded mode.
    Unsupported(String),
}

/// Shell command to run in the sandbox, and whether it is the real
/// toolchain or the diagnostic fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    pub script: String,
    pub mode: ExecutionMode,
}

/// Command used for unsupported languages.
pub const DIAGNOSTIC_SCRIPT: &str = "ls -la";

impl Language {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Self::Python,
            "javascript" | "js" | "node" => Self::JavaScript,
            "typescript" | "ts" => Self::TypeScript,
            _ => Self::Unsupported(name.trim().to_string()),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    /// File that holds generated code when the model names no files.
    pub fn entry_point(&self) -> &'static str {
        match self {
            Self::Python => "main.py",
            Self::JavaScript => "index.js",
            Self::TypeScript => "index.ts",
            Self::Unsupported(_) => "main.txt",
        }
    }

    /// Pick the command for a set of artifacts.
    ///
    /// Python runs its tests when any test file exists, otherwise the entry
    /// point. Node languages install dependencies and run `npm test`.
    pub fn command(&self, artifacts: &CodeArtifactSet) -> SandboxCommand {
        let script = match self {
            Self::Python => {
                let tests = python_test_files(artifacts);
                if tests.is_empty() {
                    format!("python {}", self.entry_point())
                } else {
                    format!("python -m pytest -v {}", tests.join(" "))
                }
            }
            Self::JavaScript => "npm install && npm test".to_string(),
            Self::TypeScript => "npm install && npx tsc && npm test".to_string(),
            Self::Unsupported(_) => {
                return SandboxCommand {
                    script: DIAGNOSTIC_SCRIPT.to_string(),
                    mode: ExecutionMode::Diagnostic,
                };
            }
        };
        SandboxCommand {
            script,
            mode: ExecutionMode::Toolchain,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python => f.write_str("python"),
            Self::JavaScript => f.write_str("javascript"),
            Self::TypeScript => f.write_str("typescript"),
            Self::Unsupported(name) => f.write_str(name),
        }
    }
}

/// Test files pytest would collect, quoted for the shell.
fn python_test_files(artifacts: &CodeArtifactSet) -> Vec<String> {
    artifacts
        .files
        .keys()
        .filter(|path| {
            let file = path.rsplit('/').next().unwrap_or(path);
            file.ends_with(".py")
                && (file == "tests.py" || file.starts_with("test_") || file.ends_with("_test.py"))
        })
        .map(|path| shell_quote(path))
        .collect()
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts(paths: &[&str]) -> CodeArtifactSet {
        let mut set = CodeArtifactSet::default();
        for p in paths {
            set.files.insert(p.to_string(), String::new());
        }
        set
    }

    #[test]
    fn parse_aliases() {
        assert_eq!(Language::parse("Python"), Language::Python);
        assert_eq!(Language::parse(" py "), Language::Python);
        assert_eq!(Language::parse("node"), Language::JavaScript);
        assert_eq!(Language::parse("TS"), Language::TypeScript);
        assert_eq!(Language::parse("rust"), Language::Unsupported("rust".to_string()));
        assert!(!Language::parse("rust").is_supported());
    }

    #[test]
    fn python_runs_tests_when_present() {
        let cmd = Language::Python.command(&artifacts(&["main.py", "tests.py"]));
        assert_eq!(cmd.script, "python -m pytest -v 'tests.py'");
        assert_eq!(cmd.mode, ExecutionMode::Toolchain);

        let cmd = Language::Python.command(&artifacts(&["calc.py", "tests/test_calc.py", "README.md"]));
        assert_eq!(cmd.script, "python -m pytest -v 'tests/test_calc.py'");
    }

    #[test]
    fn python_without_tests_runs_entry_point() {
        let cmd = Language::Python.command(&artifacts(&["main.py", "helpers.py"]));
        assert_eq!(cmd.script, "python main.py");
    }

    #[test]
    fn node_languages_install_then_test() {
        let set = artifacts(&["package.json", "index.js"]);
        assert_eq!(Language::JavaScript.command(&set).script, "npm install && npm test");
        assert_eq!(
            Language::TypeScript.command(&set).script,
            "npm install && npx tsc && npm test"
        );
    }

    #[test]
    fn unsupported_language_is_diagnostic() {
        let cmd = Language::parse("haskell").command(&artifacts(&["Main.hs"]));
        assert_eq!(cmd.script, DIAGNOSTIC_SCRIPT);
        assert_eq!(cmd.mode, ExecutionMode::Diagnostic);
    }

    #[test]
    fn test_file_names_are_shell_quoted() {
        let cmd = Language::Python.command(&artifacts(&["it's_test.py"]));
        assert_eq!(cmd.script, r"python -m pytest -v 'it'\''s_test.py'");
    }
}
