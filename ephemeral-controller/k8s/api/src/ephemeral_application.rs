use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Marks records whose environment may still need to be torn down.
pub const FINALIZER: &str = "ephemeral.argo.io/finalizer";

/// Requests a time-limited environment deployed from a Git source.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ephemeral.argo.io",
    version = "v1alpha1",
    kind = "EphemeralApplication",
    status = "EphemeralApplicationStatus",
    shortname = "ephapp",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".status.namespace"}"#,
    printcolumn = r#"{"name":"Expiration","type":"date","jsonPath":".spec.expirationDate"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralApplicationSpec {
    #[serde(rename = "repoURL")]
    pub repo_url: String,

    pub path: String,

    #[serde(default = "default_target_revision")]
    pub target_revision: String,

    /// The environment is torn down once this instant has passed.
    pub expiration_date: Time,

    /// Explicit namespace for the environment. A name is generated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<ConfigMapReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
}

/// A secret copied from another namespace or synthesized from inline values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,

    /// When non-empty, these values are used instead of copying.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, String>,
}

/// A config map copied from another namespace or created from inline data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapReference {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_namespace: Option<String>,

    /// Takes precedence over `sourceNamespace` when non-empty.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated: Option<AutomatedSyncPolicy>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedSyncPolicy {
    #[serde(default = "enabled")]
    pub prune: bool,

    #[serde(default = "enabled")]
    pub self_heal: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralApplicationStatus {
    #[serde(default)]
    pub phase: Phase,

    /// The realized namespace. Written once, when the environment is created.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_application_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copied_secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copied_config_maps: Vec<String>,
}

#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    #[default]
    #[serde(alias = "")]
    Pending,
    Creating,
    Active,
    Expiring,
    Failed,
}

fn default_target_revision() -> String {
    "HEAD".to_string()
}

fn enabled() -> bool {
    true
}

// === impl EphemeralApplication ===

impl EphemeralApplication {
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.spec.expiration_date.0
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .iter()
            .flatten()
            .any(|f| f == FINALIZER)
    }
}

// === impl EphemeralApplicationSpec ===

impl EphemeralApplicationSpec {
    /// Returns the automated sync settings, enabling prune and self-heal unless
    /// the record says otherwise.
    pub fn automated_sync(&self) -> AutomatedSyncPolicy {
        self.sync_policy
            .as_ref()
            .and_then(|p| p.automated)
            .unwrap_or_default()
    }
}

impl Default for AutomatedSyncPolicy {
    fn default() -> Self {
        Self {
            prune: true,
            self_heal: true,
        }
    }
}

// === impl SecretReference ===

impl SecretReference {
    /// The name of the secret in the environment's namespace.
    pub fn target_name(&self) -> &str {
        self.target_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }

    pub fn is_inline(&self) -> bool {
        !self.values.is_empty()
    }
}

// === impl ConfigMapReference ===

impl ConfigMapReference {
    pub fn target_name(&self) -> &str {
        &self.name
    }

    pub fn is_inline(&self) -> bool {
        !self.data.is_empty()
    }
}

// === impl Phase ===

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Creating => "Creating",
            Self::Active => "Active",
            Self::Expiring => "Expiring",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
