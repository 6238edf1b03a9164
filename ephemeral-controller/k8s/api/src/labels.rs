//! Provenance metadata stamped on everything the controller creates.

use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "argo-ephemeral-controller";

/// Name of the record an object was created for.
pub const OWNER: &str = "ephemeral.argo.io/owner";
/// Namespace of the record an object was created for.
pub const OWNER_NAMESPACE: &str = "ephemeral.argo.io/owner-namespace";

pub const INLINE: &str = "ephemeral.argo.io/inline";
pub const COPIED_FROM: &str = "ephemeral.argo.io/copied-from";
pub const SOURCE_NAME: &str = "ephemeral.argo.io/source-name";

/// Full owner name, set when it had to be shortened to fit a label value.
pub const OWNER_ANNOTATION: &str = "ephemeral.argo.io/owner";
pub const SOURCE_NAMESPACE_ANNOTATION: &str = "ephemeral.argo.io/source-namespace";
pub const SOURCE_NAME_ANNOTATION: &str = "ephemeral.argo.io/source-name";

/// Longest value Kubernetes accepts for a label.
pub const MAX_VALUE_LEN: usize = 63;

/// Where a provisioned object's data came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Origin<'a> {
    Inline,
    Copied { namespace: &'a str, name: &'a str },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Provenance {
    pub labels: Map,
    pub annotations: Map,
}

/// Labels carried by every object owned by the record `namespace/owner`.
pub fn owned_by(namespace: &str, owner: &str) -> Map {
    let mut labels = Map::new();
    labels.insert(MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(OWNER.to_string(), value(owner));
    labels.insert(OWNER_NAMESPACE.to_string(), value(namespace));
    labels
}

/// Whether `labels` carry the ownership labels of the record `namespace/owner`.
pub fn is_owned_by(labels: Option<&Map>, namespace: &str, owner: &str) -> bool {
    let Some(labels) = labels else {
        return false;
    };
    owned_by(namespace, owner)
        .iter()
        .all(|(k, v)| labels.get(k) == Some(v))
}

/// Formats `labels` as an equality label selector.
pub fn selector(labels: &Map) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Shortens `v` to a valid label value.
///
/// Values must end with an alphanumeric character, so separators exposed by
/// the cut are dropped as well.
pub fn value(v: &str) -> String {
    if v.len() <= MAX_VALUE_LEN {
        return v.to_string();
    }
    let mut end = MAX_VALUE_LEN;
    while !v.is_char_boundary(end) {
        end -= 1;
    }
    v[..end]
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

// === impl Provenance ===

impl Provenance {
    pub fn new(namespace: &str, owner: &str, origin: Origin<'_>) -> Self {
        let mut labels = owned_by(namespace, owner);
        let mut annotations = Map::new();
        if value(owner) != owner {
            annotations.insert(OWNER_ANNOTATION.to_string(), owner.to_string());
        }
        match origin {
            Origin::Inline => {
                labels.insert(INLINE.to_string(), "true".to_string());
            }
            Origin::Copied { namespace, name } => {
                labels.insert(COPIED_FROM.to_string(), value(namespace));
                labels.insert(SOURCE_NAME.to_string(), value(name));
                annotations.insert(
                    SOURCE_NAMESPACE_ANNOTATION.to_string(),
                    namespace.to_string(),
                );
                annotations.insert(SOURCE_NAME_ANNOTATION.to_string(), name.to_string());
            }
        }
        Self {
            labels,
            annotations,
        }
    }
}
