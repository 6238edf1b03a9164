use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

pub const SYNCED: &str = "Synced";
pub const HEALTHY: &str = "Healthy";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Application {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ApplicationSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub project: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ApplicationSource>,

    #[serde(default)]
    pub destination: ApplicationDestination,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_differences: Vec<ResourceIgnoreDifferences>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_revision: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApplicationDestination {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated: Option<SyncPolicyAutomated>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicyAutomated {
    #[serde(default)]
    pub prune: bool,

    #[serde(default)]
    pub self_heal: bool,
}

/// Tells the controller to leave parts of a live resource alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIgnoreDifferences {
    #[serde(default)]
    pub group: String,

    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_pointers: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApplicationStatus {
    #[serde(default)]
    pub sync: SyncStatus,

    #[serde(default)]
    pub health: HealthStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncStatus {
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ApplicationList {
    // The API returns `null` rather than an empty list.
    #[serde(default)]
    pub items: Option<Vec<Application>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationCreateRequest {
    pub application: Application,

    /// Replace an existing application with the same name instead of failing.
    pub upsert: bool,
}

/// Selects remote applications.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplicationQuery {
    pub name: Option<String>,
    pub app_namespace: Option<String>,
    pub projects: Vec<String>,
    pub selector: Option<String>,
    pub repo: Option<String>,
}

// === impl Application ===

impl Application {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn sync_status(&self) -> &str {
        self.status.as_ref().map_or("", |s| s.sync.status.as_str())
    }

    pub fn health_status(&self) -> &str {
        self.status.as_ref().map_or("", |s| s.health.status.as_str())
    }

    pub fn is_synced(&self) -> bool {
        self.sync_status() == SYNCED
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status() == HEALTHY
    }
}

// === impl ApplicationList ===

impl ApplicationList {
    pub fn into_items(self) -> Vec<Application> {
        self.items.unwrap_or_default()
    }
}

// === impl ApplicationQuery ===

impl ApplicationQuery {
    pub fn named(name: impl ToString, app_namespace: impl ToString) -> Self {
        Self {
            name: Some(name.to_string()),
            app_namespace: Some(app_namespace.to_string()),
            ..Default::default()
        }
    }

    /// True when no field would narrow the selection.
    pub fn is_empty(&self) -> bool {
        let unset = |f: &Option<String>| f.as_deref().map_or(true, str::is_empty);
        unset(&self.name)
            && unset(&self.app_namespace)
            && unset(&self.selector)
            && unset(&self.repo)
            && self.projects.iter().all(String::is_empty)
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Query parameters, excluding the name which is part of lookup paths.
    pub(crate) fn params(&self) -> Vec<(&'static str, &str)> {
        let mut params = Vec::new();
        let fields = [
            ("appNamespace", &self.app_namespace),
            ("selector", &self.selector),
            ("repo", &self.repo),
        ];
        for (key, value) in fields {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                params.push((key, value));
            }
        }
        for project in self.projects.iter().filter(|p| !p.is_empty()) {
            params.push(("projects", project.as_str()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_query() {
        assert!(ApplicationQuery::default().is_empty());
        assert!(ApplicationQuery {
            name: Some(String::new()),
            ..Default::default()
        }
        .is_empty());
        assert!(!ApplicationQuery::named("pr-42", "argocd").is_empty());
        assert!(!ApplicationQuery {
            selector: Some("team=web".to_string()),
            ..Default::default()
        }
        .is_empty());
    }

    #[test]
    fn query_params() {
        let query = ApplicationQuery {
            projects: vec!["default".to_string()],
            ..ApplicationQuery::named("pr-42", "argocd")
        };
        assert_eq!(
            query.params(),
            vec![("appNamespace", "argocd"), ("projects", "default")]
        );
    }

    #[test]
    fn decodes_null_items() {
        let list: ApplicationList =
            serde_json::from_value(serde_json::json!({ "metadata": {}, "items": null })).unwrap();
        assert!(list.into_items().is_empty());
    }

    #[test]
    fn decodes_live_status() {
        let app: Application = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "pr-42", "namespace": "argocd" },
            "spec": {
                "project": "default",
                "source": { "repoURL": "https://github.com/example/app", "path": "deploy" },
                "destination": { "server": "https://kubernetes.default.svc", "namespace": "ephemeral-abc1234" },
            },
            "status": {
                "sync": { "status": "Synced", "revision": "abc" },
                "health": { "status": "Progressing" },
            },
        }))
        .unwrap();
        assert_eq!(app.name(), "pr-42");
        assert!(app.is_synced());
        assert!(!app.is_healthy());
    }
}
