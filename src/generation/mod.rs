//! Generation service: the role-bound language-model calls behind each phase.
//!
//! A single [`GenerationService`] trait is parameterized by [`AgentRole`];
//! each role is bound to its own model and temperature through
//! [`RoleBinding`]. Implementations hold no per-task state.

pub mod openrouter;
pub mod parse;
pub mod prompts;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;

pub use openrouter::{OpenRouterClient, OpenRouterFactory};

/// The three fixed agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Turns the task description into a plan.
    Architect,
    /// Turns the plan into source files.
    Coder,
    /// Turns a failed run into fixed source files.
    Debugger,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::Coder => "coder",
            Self::Debugger => "debugger",
        }
    }

    /// System prompt describing the role to the model.
    pub fn persona(&self) -> &'static str {
        match self {
            Self::Architect => prompts::ARCHITECT_PERSONA,
            Self::Coder => prompts::CODER_PERSONA,
            Self::Debugger => prompts::DEBUGGER_PERSONA,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model identifier and sampling temperature bound to one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub model: String,
    pub temperature: f32,
}

impl RoleBinding {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
        }
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Short description of the output the role is expected to produce.
    pub expected_output: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// Abstraction over the completion capability for testability.
/// Real implementation: `OpenRouterClient`.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        role: AgentRole,
        request: GenerationRequest,
    ) -> Result<String, GenerationError>;
}

/// Builds a generation service for a submission's credential.
///
/// Submissions may carry their own API key, so the orchestrator asks for a
/// service per task rather than holding one global client.
pub trait GenerationServiceFactory: Send + Sync {
    fn for_credential(
        &self,
        credential: Option<&str>,
    ) -> Result<Arc<dyn GenerationService>, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_are_lowercase() {
        assert_eq!(AgentRole::Architect.to_string(), "architect");
        assert_eq!(AgentRole::Coder.as_str(), "coder");
        assert_eq!(
            serde_json::to_string(&AgentRole::Debugger).unwrap(),
            "\"debugger\""
        );
    }

    #[test]
    fn each_role_has_a_distinct_persona() {
        let personas = [
            AgentRole::Architect.persona(),
            AgentRole::Coder.persona(),
            AgentRole::Debugger.persona(),
        ];
        assert_ne!(personas[0], personas[1]);
        assert_ne!(personas[1], personas[2]);
        assert!(personas.iter().all(|p| !p.is_empty()));
    }
}
