use super::*;
use ephemeral_controller_k8s_api::{labels, Secret, SecretReference};
use pretty_assertions::assert_eq;

fn provisioned(store: &MemStore, argo: &FakeArgo) {
    store.insert(&with_status(
        record("pr-42", future()),
        EphemeralApplicationStatus {
            phase: Phase::Active,
            namespace: "ephemeral-abc1234".to_string(),
            remote_application_name: "pr-42".to_string(),
            ..Default::default()
        },
    ));
    store.state().namespaces.insert(
        "ephemeral-abc1234".to_string(),
        Namespace {
            metadata: ObjectMeta {
                name: Some("ephemeral-abc1234".to_string()),
                labels: Some(labels::owned_by(NS, "pr-42")),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    argo.insert(remote("pr-42", "Synced", "Healthy"));
}

#[tokio::test]
async fn removes_environment_then_releases_record() {
    let (store, argo) = (MemStore::default(), FakeArgo::default());
    provisioned(&store, &argo);
    store.request_delete("pr-42");

    let requeue = reconciler(&store, &argo).reconcile(NS, "pr-42").await.unwrap();
    assert_eq!(requeue, None);

    assert_eq!(
        argo.state().deleted,
        vec![("pr-42".to_string(), "argocd".to_string())]
    );
    assert_eq!(
        store.state().deleted_namespaces,
        vec!["ephemeral-abc1234".to_string()]
    );
    assert!(store.record("pr-42").is_none());
    assert_eq!(store.state().finalizer_writes, 1);
}

#[tokio::test]
async fn repeated_teardown_is_harmless() {
    let (store, argo) = (MemStore::default(), FakeArgo::default());
    // Both the application and the namespace are already gone.
    store.insert(&with_status(
        record("pr-42", future()),
        EphemeralApplicationStatus {
            phase: Phase::Active,
            namespace: "ephemeral-abc1234".to_string(),
            remote_application_name: "pr-42".to_string(),
            ..Default::default()
        },
    ));
    store.request_delete("pr-42");
    let reconciler = reconciler(&store, &argo);

    assert_eq!(reconciler.reconcile(NS, "pr-42").await.unwrap(), None);
    assert_eq!(reconciler.reconcile(NS, "pr-42").await.unwrap(), None);

    assert!(store.record("pr-42").is_none());
    assert_eq!(store.state().finalizer_writes, 1);
    assert_eq!(reconciler.metrics().errors(), 0);
}

#[tokio::test]
async fn interrupted_teardown_resumes() {
    let (store, argo) = (MemStore::default(), FakeArgo::default());
    provisioned(&store, &argo);
    store.request_delete("pr-42");
    argo.state().fail_delete = true;
    let reconciler = reconciler(&store, &argo);

    let err = reconciler
        .reconcile(NS, "pr-42")
        .await
        .expect_err("teardown must surface the failure");
    assert!(
        err.to_string().starts_with("failed to delete ArgoCD application pr-42"),
        "{err}"
    );
    let app = store.record("pr-42").expect("record is still held");
    assert!(app.has_finalizer());
    assert!(store.namespace_names().contains("ephemeral-abc1234"));
    assert_eq!(store.state().finalizer_writes, 0);

    argo.state().fail_delete = false;
    assert_eq!(reconciler.reconcile(NS, "pr-42").await.unwrap(), None);
    assert!(store.record("pr-42").is_none());
    assert!(store.namespace_names().is_empty());
    assert_eq!(store.state().finalizer_writes, 1);
}

#[tokio::test]
async fn deletion_without_finalizer_is_left_alone() {
    let (store, argo) = (MemStore::default(), FakeArgo::default());
    let mut app = record("pr-42", future());
    app.metadata.finalizers = Some(vec!["someone.else/finalizer".to_string()]);
    store.insert(&app);
    store.request_delete("pr-42");

    assert_eq!(
        reconciler(&store, &argo).reconcile(NS, "pr-42").await.unwrap(),
        None
    );
    assert!(store.record("pr-42").is_some());
    assert_eq!(store.state().finalizer_writes, 0);
    assert!(argo.state().deleted.is_empty());
}

#[tokio::test]
async fn other_finalizers_survive_teardown() {
    let (store, argo) = (MemStore::default(), FakeArgo::default());
    let mut app = with_status(record("pr-42", future()), Default::default());
    app.metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push("someone.else/finalizer".to_string());
    store.insert(&app);
    store.request_delete("pr-42");

    reconciler(&store, &argo).reconcile(NS, "pr-42").await.unwrap();

    let app = store.record("pr-42").expect("held by the other finalizer");
    assert_eq!(
        app.metadata.finalizers,
        Some(vec!["someone.else/finalizer".to_string()])
    );
}

#[tokio::test]
async fn environment_of_failed_provisioning_is_torn_down() {
    let (store, argo) = (MemStore::default(), FakeArgo::default());
    let mut app = record("pr-42", future());
    app.spec.secrets = vec![
        SecretReference {
            name: "inline".to_string(),
            values: maplit::btreemap! { "k".to_string() => "v".to_string() },
            ..Default::default()
        },
        SecretReference {
            name: "db".to_string(),
            source_namespace: Some("infra".to_string()),
            ..Default::default()
        },
    ];
    store.insert(&app);
    let reconciler = reconciler(&store, &argo);

    reconciler.reconcile(NS, "pr-42").await.unwrap();
    let status = store.record("pr-42").unwrap().status.unwrap();
    assert_eq!(status.phase, Phase::Failed);
    assert!(store.namespace_names().contains(&status.namespace));
    assert!(store.find::<Secret>(&status.namespace, "inline").is_some());

    store.request_delete("pr-42");
    assert_eq!(reconciler.reconcile(NS, "pr-42").await.unwrap(), None);

    assert!(store.record("pr-42").is_none());
    assert!(store.namespace_names().is_empty());
    assert!(store.find::<Secret>(&status.namespace, "inline").is_none());
}
