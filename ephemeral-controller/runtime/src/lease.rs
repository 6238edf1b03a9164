use crate::k8s::{labels, ObjectMeta};
use anyhow::Result;
use k8s_openapi::api::coordination::v1 as coordv1;
use kube::api::{Api, Patch, PatchParams};
use std::sync::Arc;
use tokio::{sync::watch, time};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);

pub(crate) type Claims = watch::Receiver<Arc<kubert::lease::Claim>>;

/// Ensures the named Lease exists and starts competing for it.
pub(crate) async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    name: &str,
    hostname: &str,
) -> Result<Claims> {
    let lease = coordv1::Lease {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            // A resource version of "0" only creates the Lease when it does
            // not already exist.
            resource_version: Some("0".to_string()),
            labels: Some(
                [(
                    labels::MANAGED_BY.to_string(),
                    labels::MANAGED_BY_VALUE.to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    };
    let api = Api::<coordv1::Lease>::namespaced(runtime.client(), ns);
    let params = PatchParams {
        field_manager: Some(labels::MANAGED_BY_VALUE.to_string()),
        ..Default::default()
    };
    match api.patch(name, &params, &Patch::Apply(lease)).await {
        Ok(lease) => tracing::info!(?lease, "Created Lease resource"),
        Err(kube::Error::Api(_)) => tracing::debug!("Lease already exists"),
        Err(error) => return Err(error.into()),
    }

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, name)
        .await?
        .spawn(hostname, params)
        .await?;
    Ok(claims)
}

/// Decides whether this replica may act on records.
#[derive(Clone, Debug)]
pub(crate) struct Leadership {
    hostname: String,
    claims: Option<Claims>,
}

impl Leadership {
    /// Every replica leads when leader election is off.
    pub(crate) fn always() -> Self {
        Self {
            hostname: String::new(),
            claims: None,
        }
    }

    pub(crate) fn elected(hostname: String, claims: Claims) -> Self {
        Self {
            hostname,
            claims: Some(claims),
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        match self.claims {
            Some(ref claims) => claims.borrow().is_current_for(&self.hostname),
            None => true,
        }
    }

    /// How long a follower waits before checking again.
    pub(crate) fn retry_after(&self) -> time::Duration {
        LEASE_DURATION
    }
}
