//! Prompt registration contract.
//!
//! The server carries no prompt text of its own; embedders register
//! prompts at startup and the dispatcher serves them verbatim, with
//! `{{name}}` placeholders substituted from call arguments.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptArgSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredPrompt {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgSpec>,
    /// Template with `{{name}}` placeholders.
    pub template: String,
}

#[derive(Default)]
pub struct PromptRegistry {
    prompts: RwLock<Vec<RegisteredPrompt>>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, prompt: RegisteredPrompt) {
        let mut prompts = self.prompts.write();
        prompts.retain(|p| p.name != prompt.name);
        prompts.push(prompt);
    }

    pub fn list(&self) -> Vec<RegisteredPrompt> {
        self.prompts.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<RegisteredPrompt> {
        self.prompts.read().iter().find(|p| p.name == name).cloned()
    }

    /// Render a prompt, substituting `{{name}}` placeholders.
    pub fn render(
        &self,
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> ServerResult<String> {
        let prompt = self
            .get(name)
            .ok_or_else(|| ServerError::validation(format!("unknown prompt '{name}'")))?;

        for spec in &prompt.arguments {
            if spec.required && !arguments.contains_key(&spec.name) {
                return Err(ServerError::validation(format!(
                    "missing required argument '{}' for prompt '{name}'",
                    spec.name
                )));
            }
        }

        let mut text = prompt.template;
        for (key, value) in arguments {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            text = text.replace(&format!("{{{{{key}}}}}"), &rendered);
        }
        Ok(text)
    }
}
