use crate::{
    argocd::{ClientConfig, HttpClient},
    controller::{self, Context},
    k8s::EphemeralApplication,
    lease::{self, Leadership},
    reconcile::{Config, KubeStore, NameGenerator, ReconcileMetrics, Reconciler, Target},
    Interval,
};
use anyhow::{bail, Context as _, Result};
use clap::Parser;
use kube::Api;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "ephemeral",
    about = "Provisions short-lived Argo CD environments and reclaims them when they expire"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "ephemeral=info,warn",
        env = "EPHEMERAL_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Base URL of the Argo CD API server.
    #[clap(
        long,
        env = "ARGO_SERVER",
        default_value = "https://argocd-server.argocd.svc.cluster.local"
    )]
    argocd_server: String,

    #[clap(long, env = "ARGO_USERNAME", default_value = "admin")]
    argocd_username: String,

    #[clap(long, env = "ARGO_PASSWORD", hide_env_values = true)]
    argocd_password: String,

    /// Namespace in which Argo CD applications are created.
    #[clap(long, env = "ARGO_NAMESPACE", default_value = "argocd")]
    argocd_namespace: String,

    #[clap(long, env = "ARGO_PROJECT", default_value = "default")]
    argocd_project: String,

    /// Skips verification of the Argo CD server certificate.
    #[clap(long, env = "ARGO_INSECURE")]
    argocd_insecure: bool,

    /// Timeout for a single request to the Argo CD API.
    #[clap(long, default_value = "10s")]
    argocd_timeout: Interval,

    /// API server on which environments are deployed.
    #[clap(
        long,
        env = "DESTINATION_SERVER",
        default_value = "https://kubernetes.default.svc"
    )]
    destination_server: String,

    #[clap(long, env = "RECONCILE_INTERVAL", default_value = "5m")]
    reconcile_interval: Interval,

    #[clap(long, default_value = "30s")]
    creating_poll_interval: Interval,

    #[clap(long, default_value = "60s")]
    reconcile_timeout: Interval,

    /// Maximum number of records reconciled at once.
    #[clap(long, default_value = "4")]
    workers: u16,

    #[clap(long, env = "ENABLE_LEADER_ELECTION")]
    leader_elect: bool,

    #[clap(long, env = "POD_NAMESPACE", default_value = "default")]
    lease_namespace: String,

    #[clap(long, default_value = "argo-ephemeral-controller")]
    lease_name: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            argocd_server,
            argocd_username,
            argocd_password,
            argocd_namespace,
            argocd_project,
            argocd_insecure,
            argocd_timeout,
            destination_server,
            reconcile_interval,
            creating_poll_interval,
            reconcile_timeout,
            workers,
            leader_elect,
            lease_namespace,
            lease_name,
        } = self;

        let mut prom = <Registry>::default();
        let metrics =
            ReconcileMetrics::register(prom.sub_registry_with_prefix("ephemeral_reconcile"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let applications = HttpClient::connect(ClientConfig {
            server: argocd_server,
            username: argocd_username,
            password: argocd_password,
            insecure: argocd_insecure,
            timeout: argocd_timeout.into(),
        })
        .await
        .context("failed to log in to Argo CD")?;

        let leadership = if leader_elect {
            let hostname =
                std::env::var("HOSTNAME").context("`HOSTNAME` must be set for leader election")?;
            let claims = lease::init(&runtime, &lease_namespace, &lease_name, &hostname).await?;
            Leadership::elected(hostname, claims)
        } else {
            Leadership::always()
        };

        let config = Config {
            reconcile_interval: reconcile_interval.into(),
            creating_poll_interval: creating_poll_interval.into(),
            pass_timeout: reconcile_timeout.into(),
            target: Target {
                project: argocd_project,
                namespace: argocd_namespace,
                destination_server,
            },
        };
        info!(?config, workers, leader_elect, "Starting controller");

        let client = runtime.client();
        let reconciler = Reconciler::new(
            KubeStore::new(client.clone()),
            applications,
            NameGenerator::new(),
            config,
            metrics,
        );
        let ctx = Arc::new(Context {
            reconciler,
            leadership,
        });
        tokio::spawn(
            controller::run(Api::<EphemeralApplication>::all(client), workers, ctx)
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
