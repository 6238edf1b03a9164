use ephemeral_controller_argocd::{
    Application, ApplicationCreateRequest, ApplicationDestination, ApplicationSource,
    ApplicationSpec, ResourceIgnoreDifferences, SyncPolicy, SyncPolicyAutomated,
};
use ephemeral_controller_k8s_api::{labels, EphemeralApplication, ObjectMeta, ResourceExt};

/// Where remote applications are created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub project: String,
    /// Namespace holding remote applications.
    pub namespace: String,
    /// API server the deployed workload lands on.
    pub destination_server: String,
}

/// Builds the request that deploys `app` into `namespace`.
///
/// Every provisioned secret and config map is listed in `ignoreDifferences`;
/// otherwise self-heal would revert their contents.
pub fn create_request(
    app: &EphemeralApplication,
    namespace: &str,
    target: &Target,
) -> ApplicationCreateRequest {
    let automated = app.spec.automated_sync();
    let application = Application {
        metadata: ObjectMeta {
            name: Some(app.name_any()),
            namespace: Some(target.namespace.clone()),
            labels: Some(labels::owned_by(
                &app.namespace().unwrap_or_default(),
                &app.name_any(),
            )),
            ..Default::default()
        },
        spec: ApplicationSpec {
            project: target.project.clone(),
            source: Some(ApplicationSource {
                repo_url: app.spec.repo_url.clone(),
                path: app.spec.path.clone(),
                target_revision: app.spec.target_revision.clone(),
            }),
            destination: ApplicationDestination {
                server: target.destination_server.clone(),
                namespace: namespace.to_string(),
            },
            sync_policy: Some(SyncPolicy {
                automated: Some(SyncPolicyAutomated {
                    prune: automated.prune,
                    self_heal: automated.self_heal,
                }),
            }),
            ignore_differences: ignore_differences(app),
        },
        status: None,
    };
    ApplicationCreateRequest {
        application,
        upsert: false,
    }
}

fn ignore_differences(app: &EphemeralApplication) -> Vec<ResourceIgnoreDifferences> {
    let secrets = app
        .spec
        .secrets
        .iter()
        .map(|s| ignore("Secret", s.target_name(), &["/data", "/stringData"]));
    let config_maps = app
        .spec
        .config_maps
        .iter()
        .map(|c| ignore("ConfigMap", c.target_name(), &["/data", "/binaryData"]));
    secrets.chain(config_maps).collect()
}

fn ignore(kind: &str, name: &str, pointers: &[&str]) -> ResourceIgnoreDifferences {
    ResourceIgnoreDifferences {
        group: String::new(),
        kind: kind.to_string(),
        name: name.to_string(),
        json_pointers: pointers.iter().map(|p| p.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemeral_controller_k8s_api::{
        AutomatedSyncPolicy, ConfigMapReference, EphemeralApplicationSpec, SecretReference,
        SyncPolicy as RecordSyncPolicy, Time,
    };
    use pretty_assertions::assert_eq;

    fn target() -> Target {
        Target {
            project: "previews".to_string(),
            namespace: "argocd".to_string(),
            destination_server: "https://kubernetes.default.svc".to_string(),
        }
    }

    fn app() -> EphemeralApplication {
        let mut app = EphemeralApplication::new(
            "pr-42",
            EphemeralApplicationSpec {
                repo_url: "https://github.com/example/app".to_string(),
                path: "deploy".to_string(),
                target_revision: "feature".to_string(),
                expiration_date: Time(chrono::Utc::now()),
                namespace_name: None,
                secrets: vec![SecretReference {
                    name: "db".to_string(),
                    source_namespace: Some("infra".to_string()),
                    target_name: Some("database".to_string()),
                    ..Default::default()
                }],
                config_maps: vec![ConfigMapReference {
                    name: "settings".to_string(),
                    ..Default::default()
                }],
                sync_policy: Some(RecordSyncPolicy {
                    automated: Some(AutomatedSyncPolicy {
                        prune: false,
                        self_heal: true,
                    }),
                }),
            },
        );
        app.metadata.namespace = Some("apps".to_string());
        app
    }

    #[test]
    fn request_targets_namespace() {
        let req = create_request(&app(), "ephemeral-abc1234", &target());
        assert!(!req.upsert);
        let remote = req.application;
        assert_eq!(remote.name(), "pr-42");
        assert_eq!(remote.metadata.namespace.as_deref(), Some("argocd"));
        assert!(labels::is_owned_by(
            remote.metadata.labels.as_ref(),
            "apps",
            "pr-42"
        ));
        assert_eq!(remote.spec.project, "previews");
        assert_eq!(
            remote.spec.source,
            Some(ApplicationSource {
                repo_url: "https://github.com/example/app".to_string(),
                path: "deploy".to_string(),
                target_revision: "feature".to_string(),
            })
        );
        assert_eq!(
            remote.spec.destination,
            ApplicationDestination {
                server: "https://kubernetes.default.svc".to_string(),
                namespace: "ephemeral-abc1234".to_string(),
            }
        );
        assert_eq!(
            remote.spec.sync_policy.and_then(|p| p.automated),
            Some(SyncPolicyAutomated {
                prune: false,
                self_heal: true,
            })
        );
    }

    #[test]
    fn ignores_provisioned_payloads() {
        let req = create_request(&app(), "ephemeral-abc1234", &target());
        assert_eq!(
            req.application.spec.ignore_differences,
            vec![
                ResourceIgnoreDifferences {
                    group: String::new(),
                    kind: "Secret".to_string(),
                    name: "database".to_string(),
                    json_pointers: vec!["/data".to_string(), "/stringData".to_string()],
                },
                ResourceIgnoreDifferences {
                    group: String::new(),
                    kind: "ConfigMap".to_string(),
                    name: "settings".to_string(),
                    json_pointers: vec!["/data".to_string(), "/binaryData".to_string()],
                },
            ]
        );
    }
}
