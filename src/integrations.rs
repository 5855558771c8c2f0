//! Integration templates: deterministic mutations of a tool definition.
//!
//! Applying a template is a pure transformation; applying several is a
//! left-fold in the order the caller listed them. Every merge is
//! idempotent: env entries de-duplicate by key, file and volume mounts by
//! destination, services exactly, and the before-script prefix is only
//! prepended when the content does not already start with it.

use std::collections::HashMap;

use automcp_platform::{FileMount, ToolDefinition, VolumeMount};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Readiness loop injected ahead of the user content by some templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessProbe {
    pub command: String,
    #[serde(default = "default_probe_retries")]
    pub retries: u32,
    #[serde(default = "default_probe_interval")]
    pub interval_seconds: u32,
}

fn default_probe_retries() -> u32 {
    30
}

fn default_probe_interval() -> u32 {
    2
}

impl ReadinessProbe {
    fn render(&self) -> String {
        format!(
            "for i in $(seq 1 {retries}); do\n  if {command}; then break; fi\n  if [ \"$i\" = \"{retries}\" ]; then echo \"readiness probe failed\" >&2; exit 1; fi\n  sleep {interval}\ndone",
            retries = self.retries,
            command = self.command,
            interval = self.interval_seconds,
        )
    }
}

/// A named, deterministic mutation of a [`ToolDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IntegrationTemplate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_script: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_additions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_additions: Vec<FileMount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_additions: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_additions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ReadinessProbe>,
}

impl IntegrationTemplate {
    /// Apply this template to a definition, returning the mutated copy.
    pub fn apply(&self, definition: &ToolDefinition) -> ToolDefinition {
        let mut out = definition.clone();

        if out.image.is_none() {
            out.image = self.default_image.clone();
        }

        for entry in &self.env_additions {
            let key = ToolDefinition::env_key(entry);
            if !out.env.iter().any(|e| ToolDefinition::env_key(e) == key) {
                out.env.push(entry.clone());
            }
        }

        for file in &self.file_additions {
            if !out.with_files.iter().any(|f| f.destination == file.destination) {
                out.with_files.push(file.clone());
            }
        }

        for volume in &self.volume_additions {
            if !out
                .with_volumes
                .iter()
                .any(|v| v.destination == volume.destination)
            {
                out.with_volumes.push(volume.clone());
            }
        }

        for service in &self.service_additions {
            if !out.with_services.contains(service) {
                out.with_services.push(service.clone());
            }
        }

        let mut prefix = String::new();
        if let Some(before) = &self.before_script {
            prefix.push_str(before);
        }
        if let Some(probe) = &self.readiness_probe {
            if !prefix.is_empty() {
                prefix.push('\n');
            }
            prefix.push_str(&probe.render());
        }
        if !prefix.is_empty() && !out.content.contains(&prefix) {
            out.content = format!("{prefix}\n{}", out.content);
        }

        out
    }
}

/// Builtin plus user-defined templates, addressed by name.
pub struct IntegrationRegistry {
    templates: HashMap<String, IntegrationTemplate>,
}

impl IntegrationRegistry {
    /// The builtin table only.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        for template in builtin_templates() {
            templates.insert(template.name.clone(), template);
        }
        Self { templates }
    }

    /// Builtins overlaid with user-defined templates (same-name wins).
    pub fn with_user_templates(user: &[IntegrationTemplate]) -> Self {
        let mut registry = Self::builtin();
        for template in user {
            registry
                .templates
                .insert(template.name.clone(), template.clone());
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&IntegrationTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// Left-fold the named templates onto a definition, in caller order.
    pub fn apply_all(
        &self,
        definition: &ToolDefinition,
        names: &[String],
    ) -> ServerResult<ToolDefinition> {
        let mut out = definition.clone();
        for name in names {
            let template = self.get(name).ok_or_else(|| {
                ServerError::validation(format!("unknown integration template '{name}'"))
            })?;
            out = template.apply(&out);
        }
        Ok(out)
    }
}

pub const KUBECTL_IMAGE: &str = "bitnami/kubectl:1.31";
pub const AWS_CLI_IMAGE: &str = "amazon/aws-cli:2.17.0";
pub const POSTGRES_CLIENT_IMAGE: &str = "postgres:16-alpine";

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Shell prefix configuring the kubectl context from the mounted
/// service-account token.
pub const KUBE_CONTEXT_SCRIPT: &str = r#"KUBE_TOKEN=$(cat /var/run/secrets/kubernetes.io/serviceaccount/token)
kubectl config set-cluster in-cluster \
  --server="https://${KUBERNETES_SERVICE_HOST}:${KUBERNETES_SERVICE_PORT}" \
  --certificate-authority=/var/run/secrets/kubernetes.io/serviceaccount/ca.crt
kubectl config set-credentials in-cluster --token="${KUBE_TOKEN}"
kubectl config set-context in-cluster --cluster=in-cluster --user=in-cluster
kubectl config use-context in-cluster"#;

const STS_ASSUME_ROLE_SCRIPT: &str = r#"CREDS=$(aws sts assume-role --role-arn "${AWS_ROLE_ARN}" --role-session-name automation --output json)
export AWS_ACCESS_KEY_ID=$(echo "$CREDS" | grep -o '"AccessKeyId": "[^"]*' | cut -d'"' -f4)
export AWS_SECRET_ACCESS_KEY=$(echo "$CREDS" | grep -o '"SecretAccessKey": "[^"]*' | cut -d'"' -f4)
export AWS_SESSION_TOKEN=$(echo "$CREDS" | grep -o '"SessionToken": "[^"]*' | cut -d'"' -f4)"#;

fn builtin_templates() -> Vec<IntegrationTemplate> {
    vec![
        IntegrationTemplate {
            name: "kubernetes/incluster".to_string(),
            default_image: Some(KUBECTL_IMAGE.to_string()),
            before_script: Some(KUBE_CONTEXT_SCRIPT.to_string()),
            env_additions: vec![
                "KUBERNETES_SERVICE_HOST=kubernetes.default.svc".to_string(),
                "KUBERNETES_SERVICE_PORT=443".to_string(),
            ],
            file_additions: vec![
                FileMount::new(SERVICE_ACCOUNT_TOKEN, SERVICE_ACCOUNT_TOKEN),
                FileMount::new(SERVICE_ACCOUNT_CA, SERVICE_ACCOUNT_CA),
            ],
            ..Default::default()
        },
        IntegrationTemplate {
            name: "aws/cli".to_string(),
            default_image: Some(AWS_CLI_IMAGE.to_string()),
            env_additions: vec![
                "AWS_PROFILE=default".to_string(),
                "AWS_DEFAULT_REGION=us-east-1".to_string(),
            ],
            file_additions: vec![
                FileMount::new("~/.aws/credentials", "/root/.aws/credentials"),
                FileMount::new("~/.aws/config", "/root/.aws/config"),
            ],
            ..Default::default()
        },
        IntegrationTemplate {
            name: "aws/iam-role".to_string(),
            default_image: Some(AWS_CLI_IMAGE.to_string()),
            before_script: Some(STS_ASSUME_ROLE_SCRIPT.to_string()),
            env_additions: vec![
                "AWS_PROFILE=default".to_string(),
                "AWS_DEFAULT_REGION=us-east-1".to_string(),
            ],
            file_additions: vec![
                FileMount::new("~/.aws/credentials", "/root/.aws/credentials"),
                FileMount::new("~/.aws/config", "/root/.aws/config"),
            ],
            ..Default::default()
        },
        IntegrationTemplate {
            name: "database/postgres".to_string(),
            default_image: Some(POSTGRES_CLIENT_IMAGE.to_string()),
            env_additions: vec![
                "PGHOST=postgres".to_string(),
                "PGPORT=5432".to_string(),
                "PGUSER=postgres".to_string(),
                "PGDATABASE=postgres".to_string(),
            ],
            service_additions: vec!["postgres:16-alpine".to_string()],
            readiness_probe: Some(ReadinessProbe {
                command: "pg_isready -h \"$PGHOST\" -p \"$PGPORT\"".to_string(),
                retries: 30,
                interval_seconds: 2,
            }),
            ..Default::default()
        },
    ]
}
