//! Prompt templates for the three agent roles.
//!
//! Every code-producing prompt asks for files as fenced blocks whose info
//! string carries the path (`` ```python main.py ``), which is the format
//! `parse::extract_artifacts` understands.

use crate::sandbox::Language;
use crate::task::{CodeArtifactSet, ExecutionResult, Plan, TaskRequest};

pub const ARCHITECT_PERSONA: &str = "You are a System Architect. You design robust software \
architectures and break complex tasks down into concrete, actionable components.";

pub const CODER_PERSONA: &str = "You are a Lead Developer. You write complete, production-ready \
code, with unit tests, that implements an architectural plan exactly.";

pub const DEBUGGER_PERSONA: &str = "You are a QA and Debugging Specialist. You read failing test \
output, find the root cause, and return corrected source files.";

/// Longest slice of stdout/stderr quoted back to the Debugger.
const MAX_QUOTED_OUTPUT: usize = 4000;

/// Entry point and test file conventions per language, quoted in prompts.
fn file_conventions(language: &str) -> &'static str {
    match Language::parse(language) {
        Language::Python => {
            "Put the implementation in `main.py` and pytest tests in `tests.py` \
             (tests import from `main`)."
        }
        Language::JavaScript => {
            "Include a `package.json` whose `test` script runs the tests, \
             the implementation in `index.js`, and tests next to it."
        }
        Language::TypeScript => {
            "Include a `package.json` whose `test` script runs the tests, a `tsconfig.json`, \
             the implementation in `index.ts`, and tests next to it."
        }
        Language::Unsupported(_) => "Name the primary entry point file clearly.",
    }
}

/// Prompt for the Architect: task description to plan.
pub fn build_plan_prompt(request: &TaskRequest) -> String {
    format!(
        "Task: {}\n\
         Target Language: {}\n\
         Target Framework: {}\n\n\
         Create a detailed architecture plan that includes:\n\
         1. System components and their responsibilities\n\
         2. Data structures and relationships\n\
         3. Implementation steps in order\n\
         4. Testing strategy\n\
         5. Potential edge cases\n\n\
         List each component on its own line as `- Component: <name> - <responsibility>`.",
        request.description.trim(),
        request.language,
        request.framework.as_deref().unwrap_or("None"),
    )
}

/// Prompt for the Coder: plan to source files.
pub fn build_coding_prompt(plan: &Plan) -> String {
    format!(
        "Based on this architecture plan:\n\n{}\n\n\
         Target Language: {}\n\
         Framework: {}\n\n\
         Generate production-ready code that:\n\
         1. Implements all components from the plan\n\
         2. Includes proper error handling\n\
         3. Includes unit tests\n\
         4. Follows best practices for {}\n\n\
         {}\n\n\
         Return every file as a fenced code block whose info string is the language \
         followed by the relative file path, for example:\n\n\
         ```{} {}\n...\n```",
        plan.plan_text.trim(),
        plan.target_language,
        plan.framework.as_deref().unwrap_or("None"),
        plan.target_language,
        file_conventions(&plan.target_language),
        plan.target_language.to_lowercase(),
        Language::parse(&plan.target_language).entry_point(),
    )
}

/// Prompt for the Debugger: failed run plus current code to fixed files.
pub fn build_debug_prompt(
    execution: &ExecutionResult,
    artifacts: &CodeArtifactSet,
    plan: &Plan,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Previous execution failed with:\n");
    prompt.push_str(&format!(
        "STATUS: {}\nEXIT CODE: {}\n",
        execution.status,
        execution
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string())
    ));
    if let Some(ref error) = execution.error {
        prompt.push_str(&format!("SANDBOX ERROR: {}\n", error));
    }
    prompt.push_str(&format!("STDOUT:\n{}\n", tail(&execution.stdout, MAX_QUOTED_OUTPUT)));
    prompt.push_str(&format!("STDERR:\n{}\n\n", tail(&execution.stderr, MAX_QUOTED_OUTPUT)));

    prompt.push_str("Current code:\n\n");
    for (path, contents) in &artifacts.files {
        prompt.push_str(&format!(
            "```{} {}\n{}\n```\n\n",
            plan.target_language.to_lowercase(),
            path,
            contents.trim_end()
        ));
    }

    prompt.push_str(&format!(
        "Original plan:\n{}\n\n\
         Analyze the errors and return the complete fixed code. {}\n\
         Return every file, changed or not, as a fenced code block tagged with its path.",
        plan.plan_text.trim(),
        file_conventions(&plan.target_language),
    ));
    prompt
}

/// Last `max` bytes of `text`, on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
