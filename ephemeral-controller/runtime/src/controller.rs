use crate::{
    argocd::HttpClient,
    k8s::{EphemeralApplication, ResourceExt},
    lease::Leadership,
    reconcile::{self, KubeStore, Reconciler},
};
use futures::prelude::*;
use kube::{
    runtime::{
        controller::{self, Action, Controller},
        watcher,
    },
    Api,
};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

/// Delay before a failed pass is retried.
const ERROR_REQUEUE: Duration = Duration::from_secs(15);

pub(crate) struct Context {
    pub(crate) reconciler: Reconciler<KubeStore, HttpClient>,
    pub(crate) leadership: Leadership,
}

/// Watches records cluster-wide and runs up to `workers` passes at once.
///
/// Passes for the same record never overlap.
pub(crate) async fn run(api: Api<EphemeralApplication>, workers: u16, ctx: Arc<Context>) {
    Controller::new(api, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(workers))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(%obj, ?action, "Reconciled"),
                Err(error) => warn!(%error, "Controller error"),
            }
        })
        .await
}

async fn reconcile(
    app: Arc<EphemeralApplication>,
    ctx: Arc<Context>,
) -> reconcile::Result<Action> {
    if !ctx.leadership.is_leader() {
        return Ok(Action::requeue(ctx.leadership.retry_after()));
    }

    let namespace = app.namespace().unwrap_or_default();
    let name = app.name_any();
    let requeue = ctx
        .reconciler
        .reconcile(&namespace, &name)
        .instrument(info_span!("reconcile", %namespace, %name))
        .await?;
    Ok(to_action(requeue))
}

fn error_policy(
    app: Arc<EphemeralApplication>,
    error: &reconcile::Error,
    _ctx: Arc<Context>,
) -> Action {
    warn!(
        namespace = app.namespace().unwrap_or_default(),
        name = app.name_any(),
        %error,
        "Reconciliation failed",
    );
    Action::requeue(ERROR_REQUEUE)
}

fn to_action(requeue: Option<Duration>) -> Action {
    match requeue {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}
