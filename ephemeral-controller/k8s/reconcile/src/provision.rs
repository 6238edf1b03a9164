//! Copies or synthesizes secrets and config maps into an environment's
//! namespace.

use crate::store::{self, Object, Store};
use ephemeral_controller_k8s_api::{
    labels::{Origin, Provenance},
    ByteString, ConfigMap, ConfigMapReference, EphemeralApplication, ObjectMeta, ResourceExt,
    Secret, SecretReference,
};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {name:?} sets neither a source namespace nor inline data")]
    NoSource { kind: &'static str, name: String },

    #[error("{kind} {name:?} not found in namespace {namespace}")]
    SourceNotFound {
        kind: &'static str,
        name: String,
        namespace: String,
    },

    #[error("failed to provision {kind} {name:?}: {source}")]
    Store {
        kind: &'static str,
        name: String,
        #[source]
        source: store::Error,
    },
}

const SECRET: &str = "secret";
const CONFIG_MAP: &str = "config map";

/// Provisions every secret the record references into `namespace`, stopping at
/// the first failure.
pub async fn provision_secrets<S: Store>(
    store: &S,
    app: &EphemeralApplication,
    namespace: &str,
) -> Result<(), Error> {
    for reference in &app.spec.secrets {
        let secret = secret_for(store, app, reference, namespace).await?;
        upsert(store, namespace, secret, merge_secret)
            .await
            .map_err(|source| Error::Store {
                kind: SECRET,
                name: reference.name.clone(),
                source,
            })?;
        debug!(secret = %reference.target_name(), %namespace, "Provisioned");
    }
    Ok(())
}

/// Provisions every config map the record references into `namespace`,
/// stopping at the first failure.
pub async fn provision_config_maps<S: Store>(
    store: &S,
    app: &EphemeralApplication,
    namespace: &str,
) -> Result<(), Error> {
    for reference in &app.spec.config_maps {
        let config_map = config_map_for(store, app, reference, namespace).await?;
        upsert(store, namespace, config_map, merge_config_map)
            .await
            .map_err(|source| Error::Store {
                kind: CONFIG_MAP,
                name: reference.name.clone(),
                source,
            })?;
        debug!(config_map = %reference.target_name(), %namespace, "Provisioned");
    }
    Ok(())
}

/// Summaries of the record's secrets as shown in its status.
pub fn copied_secrets_summary(app: &EphemeralApplication) -> Vec<String> {
    app.spec
        .secrets
        .iter()
        .map(|s| {
            summary(
                &s.name,
                s.is_inline(),
                s.source_namespace.as_deref(),
                s.target_name(),
            )
        })
        .collect()
}

/// Summaries of the record's config maps as shown in its status.
pub fn copied_config_maps_summary(app: &EphemeralApplication) -> Vec<String> {
    app.spec
        .config_maps
        .iter()
        .map(|c| {
            summary(
                &c.name,
                c.is_inline(),
                c.source_namespace.as_deref(),
                c.target_name(),
            )
        })
        .collect()
}

fn summary(name: &str, inline: bool, source: Option<&str>, target: &str) -> String {
    match source.filter(|_| !inline) {
        Some(ns) => format!("{ns}/{name} -> {target}"),
        None => format!("{name} (inline)"),
    }
}

async fn secret_for<S: Store>(
    store: &S,
    app: &EphemeralApplication,
    reference: &SecretReference,
    namespace: &str,
) -> Result<Secret, Error> {
    let target = reference.target_name();
    if reference.is_inline() {
        let data = reference
            .values
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
            .collect();
        return Ok(Secret {
            metadata: metadata(target, namespace, provenance(app, Origin::Inline)),
            type_: Some("Opaque".to_string()),
            data: Some(data),
            ..Default::default()
        });
    }

    let source_ns = source_namespace(SECRET, &reference.name, &reference.source_namespace)?;
    let source = fetch::<S, Secret>(store, SECRET, source_ns, &reference.name).await?;
    let origin = Origin::Copied {
        namespace: source_ns,
        name: &reference.name,
    };
    Ok(Secret {
        metadata: metadata(target, namespace, provenance(app, origin)),
        type_: source.type_,
        data: source.data,
        ..Default::default()
    })
}

async fn config_map_for<S: Store>(
    store: &S,
    app: &EphemeralApplication,
    reference: &ConfigMapReference,
    namespace: &str,
) -> Result<ConfigMap, Error> {
    let target = reference.target_name();
    if reference.is_inline() {
        return Ok(ConfigMap {
            metadata: metadata(target, namespace, provenance(app, Origin::Inline)),
            data: Some(reference.data.clone()),
            ..Default::default()
        });
    }

    let source_ns = source_namespace(CONFIG_MAP, &reference.name, &reference.source_namespace)?;
    let source = fetch::<S, ConfigMap>(store, CONFIG_MAP, source_ns, &reference.name).await?;
    let origin = Origin::Copied {
        namespace: source_ns,
        name: &reference.name,
    };
    Ok(ConfigMap {
        metadata: metadata(target, namespace, provenance(app, origin)),
        data: source.data,
        binary_data: source.binary_data,
        ..Default::default()
    })
}

fn source_namespace<'a>(
    kind: &'static str,
    name: &str,
    ns: &'a Option<String>,
) -> Result<&'a str, Error> {
    ns.as_deref()
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| Error::NoSource {
            kind,
            name: name.to_string(),
        })
}

async fn fetch<S: Store, K: Object>(
    store: &S,
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> Result<K, Error> {
    store.get(namespace, name).await.map_err(|source| {
        if source.is_not_found() {
            Error::SourceNotFound {
                kind,
                name: name.to_string(),
                namespace: namespace.to_string(),
            }
        } else {
            Error::Store {
                kind,
                name: name.to_string(),
                source,
            }
        }
    })
}

fn provenance(app: &EphemeralApplication, origin: Origin<'_>) -> Provenance {
    Provenance::new(&app.namespace().unwrap_or_default(), &app.name_any(), origin)
}

fn metadata(name: &str, namespace: &str, provenance: Provenance) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(provenance.labels),
        annotations: Some(provenance.annotations).filter(|a| !a.is_empty()),
        ..Default::default()
    }
}

/// Creates `desired`, or carries its payload onto the existing object when one
/// with the same name is already present.
async fn upsert<S, K>(
    store: &S,
    namespace: &str,
    desired: K,
    merge: fn(&mut K, K),
) -> store::Result<()>
where
    S: Store,
    K: Object,
{
    match store.create(namespace, &desired).await {
        Ok(_) => Ok(()),
        Err(error) if error.is_already_exists() => {
            let name = desired.name_any();
            let mut existing = store.get::<K>(namespace, &name).await?;
            merge(&mut existing, desired);
            store.replace(namespace, &name, &existing).await.map(|_| ())
        }
        Err(error) => Err(error),
    }
}

fn merge_secret(existing: &mut Secret, desired: Secret) {
    merge_metadata(&mut existing.metadata, desired.metadata);
    // The type of an existing secret cannot be changed.
    existing.data = desired.data;
}

fn merge_config_map(existing: &mut ConfigMap, desired: ConfigMap) {
    merge_metadata(&mut existing.metadata, desired.metadata);
    existing.data = desired.data;
    existing.binary_data = desired.binary_data;
}

/// Reapplies provenance while leaving labels and annotations written by others.
fn merge_metadata(existing: &mut ObjectMeta, desired: ObjectMeta) {
    if let Some(labels) = desired.labels {
        existing.labels.get_or_insert_with(Default::default).extend(labels);
    }
    if let Some(annotations) = desired.annotations {
        existing
            .annotations
            .get_or_insert_with(Default::default)
            .extend(annotations);
    }
}
