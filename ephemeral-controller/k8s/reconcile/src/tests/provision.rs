use super::*;
use crate::provision::{
    self, copied_config_maps_summary, copied_secrets_summary, provision_config_maps,
    provision_secrets,
};
use ephemeral_controller_k8s_api::{
    labels, ByteString, ConfigMap, ConfigMapReference, Secret, SecretReference,
};
use maplit::btreemap;
use pretty_assertions::assert_eq;

const TARGET: &str = "ephemeral-abc1234";

fn source_secret(password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("db".to_string()),
            namespace: Some("infra".to_string()),
            ..Default::default()
        },
        type_: Some("kubernetes.io/basic-auth".to_string()),
        data: Some(btreemap! {
            "password".to_string() => ByteString(password.as_bytes().to_vec()),
        }),
        ..Default::default()
    }
}

fn with_secrets(secrets: Vec<SecretReference>) -> EphemeralApplication {
    let mut app = record("pr-42", future());
    app.spec.secrets = secrets;
    app
}

fn with_config_maps(config_maps: Vec<ConfigMapReference>) -> EphemeralApplication {
    let mut app = record("pr-42", future());
    app.spec.config_maps = config_maps;
    app
}

fn db_reference() -> SecretReference {
    SecretReference {
        name: "db".to_string(),
        source_namespace: Some("infra".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn empty_references_are_noops() {
    let store = MemStore::default();
    let app = record("pr-42", future());
    provision_secrets(&store, &app, TARGET).await.unwrap();
    provision_config_maps(&store, &app, TARGET).await.unwrap();
    assert!(copied_secrets_summary(&app).is_empty());
    assert!(copied_config_maps_summary(&app).is_empty());
}

#[tokio::test]
async fn copied_secret_carries_provenance() {
    let store = MemStore::default();
    store.insert(&source_secret("hunter2"));
    let app = with_secrets(vec![SecretReference {
        target_name: Some("database".to_string()),
        ..db_reference()
    }]);

    provision_secrets(&store, &app, TARGET).await.unwrap();

    let copy = store.find::<Secret>(TARGET, "database").expect("copied");
    assert_eq!(copy.type_.as_deref(), Some("kubernetes.io/basic-auth"));
    assert_eq!(copy.data, source_secret("hunter2").data);
    assert_eq!(
        copy.metadata.labels,
        Some(btreemap! {
            labels::MANAGED_BY.to_string() => labels::MANAGED_BY_VALUE.to_string(),
            labels::OWNER.to_string() => "pr-42".to_string(),
            labels::OWNER_NAMESPACE.to_string() => NS.to_string(),
            labels::COPIED_FROM.to_string() => "infra".to_string(),
            labels::SOURCE_NAME.to_string() => "db".to_string(),
        })
    );
    assert_eq!(
        copy.metadata.annotations,
        Some(btreemap! {
            labels::SOURCE_NAMESPACE_ANNOTATION.to_string() => "infra".to_string(),
            labels::SOURCE_NAME_ANNOTATION.to_string() => "db".to_string(),
        })
    );
    assert_eq!(
        copied_secrets_summary(&app),
        vec!["infra/db -> database".to_string()]
    );
}

#[tokio::test]
async fn secret_upsert_is_idempotent_and_corrective() {
    let store = MemStore::default();
    store.insert(&source_secret("hunter2"));
    let app = with_secrets(vec![db_reference()]);

    provision_secrets(&store, &app, TARGET).await.unwrap();
    let first = store.find::<Secret>(TARGET, "db").unwrap();

    // Someone annotates the copy; the annotation must survive an upsert.
    let mut annotated = first.clone();
    annotated
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert("team".to_string(), "web".to_string());
    store.insert(&annotated);

    provision_secrets(&store, &app, TARGET).await.unwrap();
    let second = store.find::<Secret>(TARGET, "db").unwrap();
    assert_eq!(second.data, first.data);
    assert_eq!(
        second
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get("team"))
            .map(String::as_str),
        Some("web")
    );

    store.insert(&source_secret("correct-horse"));
    provision_secrets(&store, &app, TARGET).await.unwrap();
    let third = store.find::<Secret>(TARGET, "db").unwrap();
    assert_eq!(third.data, source_secret("correct-horse").data);
}

#[tokio::test]
async fn inline_secret_is_opaque() {
    let store = MemStore::default();
    let app = with_secrets(vec![SecretReference {
        name: "inline".to_string(),
        values: btreemap! { "k".to_string() => "v".to_string() },
        ..Default::default()
    }]);

    provision_secrets(&store, &app, TARGET).await.unwrap();

    let secret = store.find::<Secret>(TARGET, "inline").unwrap();
    assert_eq!(secret.type_.as_deref(), Some("Opaque"));
    assert_eq!(
        secret.data,
        Some(btreemap! { "k".to_string() => ByteString(b"v".to_vec()) })
    );
    let labels = secret.metadata.labels.unwrap();
    assert_eq!(labels.get(labels::INLINE).map(String::as_str), Some("true"));
    assert!(!labels.contains_key(labels::COPIED_FROM));
    assert_eq!(secret.metadata.annotations, None);
}

#[tokio::test]
async fn reference_without_source_names_itself() {
    let store = MemStore::default();
    let app = with_secrets(vec![SecretReference {
        name: "orphan".to_string(),
        ..Default::default()
    }]);

    let err = provision_secrets(&store, &app, TARGET)
        .await
        .expect_err("reference has no source");
    assert!(matches!(err, provision::Error::NoSource { .. }), "{err}");
    assert!(err.to_string().contains("\"orphan\""), "{err}");
}

#[tokio::test]
async fn provisioning_stops_at_first_failure() {
    let store = MemStore::default();
    let app = with_secrets(vec![
        SecretReference {
            name: "missing".to_string(),
            source_namespace: Some("infra".to_string()),
            ..Default::default()
        },
        SecretReference {
            name: "inline".to_string(),
            values: btreemap! { "k".to_string() => "v".to_string() },
            ..Default::default()
        },
    ]);

    let err = provision_secrets(&store, &app, TARGET)
        .await
        .expect_err("source is missing");
    assert!(
        matches!(err, provision::Error::SourceNotFound { ref name, .. } if name == "missing"),
        "{err}"
    );
    assert!(store.find::<Secret>(TARGET, "inline").is_none());
}

#[tokio::test]
async fn config_map_copy_keeps_binary_data() {
    let store = MemStore::default();
    store.insert(&ConfigMap {
        metadata: ObjectMeta {
            name: Some("settings".to_string()),
            namespace: Some("shared".to_string()),
            ..Default::default()
        },
        data: Some(btreemap! { "mode".to_string() => "test".to_string() }),
        binary_data: Some(btreemap! { "blob".to_string() => ByteString(vec![0, 1, 2]) }),
        ..Default::default()
    });
    let app = with_config_maps(vec![ConfigMapReference {
        name: "settings".to_string(),
        source_namespace: Some("shared".to_string()),
        ..Default::default()
    }]);

    provision_config_maps(&store, &app, TARGET).await.unwrap();

    let copy = store.find::<ConfigMap>(TARGET, "settings").unwrap();
    assert_eq!(
        copy.data,
        Some(btreemap! { "mode".to_string() => "test".to_string() })
    );
    assert_eq!(
        copy.binary_data,
        Some(btreemap! { "blob".to_string() => ByteString(vec![0, 1, 2]) })
    );
    assert_eq!(
        copied_config_maps_summary(&app),
        vec!["shared/settings -> settings".to_string()]
    );
}

#[tokio::test]
async fn inline_config_data_wins_over_source() {
    let store = MemStore::default();
    let app = with_config_maps(vec![ConfigMapReference {
        name: "settings".to_string(),
        // Never read: the inline data takes precedence.
        source_namespace: Some("shared".to_string()),
        data: btreemap! { "mode".to_string() => "inline".to_string() },
    }]);

    provision_config_maps(&store, &app, TARGET).await.unwrap();

    let cm = store.find::<ConfigMap>(TARGET, "settings").unwrap();
    assert_eq!(
        cm.data,
        Some(btreemap! { "mode".to_string() => "inline".to_string() })
    );
    assert_eq!(
        cm.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::INLINE))
            .map(String::as_str),
        Some("true")
    );
    assert_eq!(
        copied_config_maps_summary(&app),
        vec!["settings (inline)".to_string()]
    );
}

#[tokio::test]
async fn long_source_names_fit_in_labels() {
    let store = MemStore::default();
    let long = format!("db-{}", "x".repeat(120));
    let mut source = source_secret("hunter2");
    source.metadata.name = Some(long.clone());
    store.insert(&source);
    let app = with_secrets(vec![SecretReference {
        name: long.clone(),
        source_namespace: Some("infra".to_string()),
        target_name: Some("db".to_string()),
        ..Default::default()
    }]);

    provision_secrets(&store, &app, TARGET).await.unwrap();

    let copy = store.find::<Secret>(TARGET, "db").unwrap();
    let copied = copy.metadata.labels.unwrap();
    assert!(
        copied.values().all(|v| v.len() <= labels::MAX_VALUE_LEN),
        "{copied:?}"
    );
    assert_eq!(
        copy.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(labels::SOURCE_NAME_ANNOTATION)),
        Some(&long)
    );
}
