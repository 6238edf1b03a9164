use crate::{
    application::{self, Target},
    metrics::{ReconcileMetrics, DELETING},
    namegen::NameGenerator,
    provision,
    store::{self, Store},
};
use chrono::Utc;
use ephemeral_controller_argocd::{self as argocd, ApplicationQuery, Applications};
use ephemeral_controller_k8s_api::{
    labels, Condition, EphemeralApplication, EphemeralApplicationStatus, Namespace, ObjectMeta,
    Phase, ResourceExt, Time, FINALIZER,
};
use std::fmt;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

pub const READY: &str = "Ready";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Delay between passes over active and failed records.
    pub reconcile_interval: Duration,
    /// Delay between passes while waiting for a new environment to sync.
    pub creating_poll_interval: Duration,
    /// Upper bound on a single pass.
    pub pass_timeout: Duration,
    pub target: Target,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: store::Error,
    },

    #[error("failed to {context}: {source}")]
    Application {
        context: String,
        #[source]
        source: argocd::Error,
    },

    #[error("reconciliation did not complete within {0:?}")]
    Timeout(Duration),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Drives records through their lifecycle.
///
/// A pass may be repeated at any time. The caller must not run two passes for
/// the same record concurrently.
pub struct Reconciler<S, A> {
    store: S,
    applications: A,
    names: NameGenerator,
    config: Config,
    metrics: ReconcileMetrics,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(5 * 60),
            creating_poll_interval: Duration::from_secs(30),
            pass_timeout: Duration::from_secs(60),
            target: Target {
                project: "default".to_string(),
                namespace: "argocd".to_string(),
                destination_server: "https://kubernetes.default.svc".to_string(),
            },
        }
    }
}

// === impl Error ===

impl Error {
    fn store(context: impl ToString, source: store::Error) -> Self {
        Self::Store {
            context: context.to_string(),
            source,
        }
    }

    fn application(context: impl ToString, source: argocd::Error) -> Self {
        Self::Application {
            context: context.to_string(),
            source,
        }
    }
}

// === impl Reconciler ===

impl<S: Store, A: Applications> Reconciler<S, A> {
    pub fn new(
        store: S,
        applications: A,
        names: NameGenerator,
        config: Config,
        metrics: ReconcileMetrics,
    ) -> Self {
        Self {
            store,
            applications,
            names,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    /// Runs one pass over the named record and returns the delay after which
    /// it should be reconciled again, if any.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Option<Duration>> {
        let timeout = self.config.pass_timeout;
        let res = match time::timeout(timeout, self.pass(namespace, name)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(timeout)),
        };
        if res.is_err() {
            self.metrics.error();
        }
        res
    }

    async fn pass(&self, namespace: &str, name: &str) -> Result<Option<Duration>> {
        let app = match self.store.get::<EphemeralApplication>(namespace, name).await {
            Ok(app) => app,
            Err(error) if error.is_not_found() => {
                debug!("Record no longer exists");
                return Ok(None);
            }
            Err(error) => return Err(Error::store(format!("get {namespace}/{name}"), error)),
        };

        if app.is_deleting() {
            self.metrics.pass(DELETING);
            self.teardown(&app).await?;
            return Ok(None);
        }

        self.metrics.pass(app.phase().as_str());

        // Nothing is created on the record's behalf until it carries the
        // finalizer.
        let app = if app.has_finalizer() {
            app
        } else {
            self.add_finalizer(&app).await?
        };

        if app.is_expired_at(Utc::now()) {
            return self.expire(&app).await;
        }

        match app.phase() {
            Phase::Pending => self.create_environment(&app).await,
            Phase::Creating => self.await_ready(&app).await,
            Phase::Active => self.refresh(&app).await,
            Phase::Failed => Ok(Some(self.config.reconcile_interval)),
            // The record's deletion was requested when it entered this phase.
            Phase::Expiring => self.expire(&app).await,
        }
    }

    async fn add_finalizer(&self, app: &EphemeralApplication) -> Result<EphemeralApplication> {
        let mut finalizers = app.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        let app = self
            .store
            .set_finalizers(app, finalizers)
            .await
            .map_err(|e| Error::store(format!("add finalizer to {}", app.name_any()), e))?;
        debug!("Added finalizer");
        Ok(app)
    }

    async fn create_environment(&self, app: &EphemeralApplication) -> Result<Option<Duration>> {
        let (record_ns, owner) = identity(app);
        let owned = labels::owned_by(&record_ns, &owner);
        let mut status = app.status.clone().unwrap_or_default();
        let namespace = self.resolve_namespace(app, &status, &owned).await?;

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.clone()),
                labels: Some(owned),
                ..Default::default()
            },
            ..Default::default()
        };
        match self.store.create_namespace(&ns).await {
            Ok(()) => info!(%namespace, "Created namespace"),
            Err(error) if error.is_already_exists() => debug!(%namespace, "Namespace exists"),
            Err(error) => {
                return self
                    .fail_with(app, status, "Failed to create namespace", error)
                    .await
            }
        }

        // The namespace is recorded from here on so that teardown removes it
        // even if a later step fails.
        status.namespace = namespace.clone();

        if let Err(error) = provision::provision_secrets(&self.store, app, &namespace).await {
            return self
                .fail_with(app, status, "Failed to provision secrets", error)
                .await;
        }
        if let Err(error) = provision::provision_config_maps(&self.store, app, &namespace).await {
            return self
                .fail_with(app, status, "Failed to provision config maps", error)
                .await;
        }

        let remote = match self.ensure_application(app, &namespace).await {
            Ok(remote) => remote,
            Err(error) => {
                return self
                    .fail_with(app, status, "Failed to create ArgoCD application", error)
                    .await
            }
        };
        let remote_name = match remote.name() {
            "" => owner,
            name => name.to_string(),
        };
        info!(%namespace, application = %remote_name, "Created ArgoCD application");

        let mut next = status;
        next.phase = Phase::Creating;
        next.remote_application_name = remote_name;
        next.message = "ArgoCD application created successfully".to_string();
        next.copied_secrets = provision::copied_secrets_summary(app);
        next.copied_config_maps = provision::copied_config_maps_summary(app);
        set_condition(
            &mut next.conditions,
            ready(app, false, "Creating", "Creating ephemeral environment"),
        );
        self.persist(app, next).await?;

        Ok(Some(self.config.creating_poll_interval))
    }

    /// Picks the record's namespace. A namespace left behind by an earlier
    /// pass that failed before recording it is adopted rather than replaced.
    async fn resolve_namespace(
        &self,
        app: &EphemeralApplication,
        status: &EphemeralApplicationStatus,
        owned: &labels::Map,
    ) -> Result<String> {
        if !status.namespace.is_empty() {
            return Ok(status.namespace.clone());
        }
        let hint = app.spec.namespace_name.as_deref().filter(|h| !h.is_empty());
        if hint.is_some() {
            return Ok(self.names.generate(hint));
        }
        match self.store.find_namespace(owned).await {
            Ok(Some(namespace)) => {
                debug!(%namespace, "Adopting namespace");
                Ok(namespace)
            }
            Ok(None) => Ok(self.names.generate(None)),
            Err(error) => Err(Error::store(
                format!("find namespace of {}", app.name_any()),
                error,
            )),
        }
    }

    /// Creates the remote application unless one created for this record
    /// already exists.
    async fn ensure_application(
        &self,
        app: &EphemeralApplication,
        namespace: &str,
    ) -> argocd::Result<argocd::Application> {
        let (record_ns, owner) = identity(app);
        let query = ApplicationQuery::named(&owner, &self.config.target.namespace);
        match self.applications.get_application(&query).await {
            Ok(existing) => {
                if labels::is_owned_by(existing.metadata.labels.as_ref(), &record_ns, &owner) {
                    debug!(application = %existing.name(), "Adopting ArgoCD application");
                    return Ok(existing);
                }
                return Err(argocd::Error::Api {
                    status: argocd::StatusCode::CONFLICT,
                    message: format!(
                        "application {} already exists and belongs to another record",
                        existing.name()
                    ),
                })
            }
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(error),
        }

        let request = application::create_request(app, namespace, &self.config.target);
        self.applications.create_application(request).await
    }

    async fn await_ready(&self, app: &EphemeralApplication) -> Result<Option<Duration>> {
        let remote = match self.get_remote(app).await {
            Ok(remote) => remote,
            Err(error) if error.is_not_found() => {
                return self.fail(app, "ArgoCD application not found", error).await;
            }
            Err(error) => {
                return Err(Error::application(
                    format!("get ArgoCD application {}", remote_name(app)),
                    error,
                ))
            }
        };

        if !(remote.is_synced() && remote.is_healthy()) {
            debug!(
                sync = %remote.sync_status(),
                health = %remote.health_status(),
                "Waiting for application"
            );
            return Ok(Some(self.config.creating_poll_interval));
        }

        let mut next = app.status.clone().unwrap_or_default();
        next.phase = Phase::Active;
        next.message = "Ephemeral environment is active".to_string();
        next.last_sync_time = Some(Time(Utc::now()));
        set_condition(
            &mut next.conditions,
            ready(
                app,
                true,
                "Active",
                "Ephemeral environment is active and healthy",
            ),
        );
        self.persist(app, next).await?;

        Ok(Some(self.config.reconcile_interval))
    }

    async fn refresh(&self, app: &EphemeralApplication) -> Result<Option<Duration>> {
        let remote = match self.get_remote(app).await {
            Ok(remote) => remote,
            Err(error) if error.is_not_found() => {
                return self.fail(app, "ArgoCD application disappeared", error).await;
            }
            Err(error) => {
                return Err(Error::application(
                    format!("get ArgoCD application {}", remote_name(app)),
                    error,
                ))
            }
        };

        if remote.is_synced() {
            let mut next = app.status.clone().unwrap_or_default();
            next.last_sync_time = Some(Time(Utc::now()));
            self.persist(app, next).await?;
        }

        Ok(Some(self.config.reconcile_interval))
    }

    /// Marks the record as expiring and deletes it. Teardown happens on the
    /// pass that observes the deletion.
    async fn expire(&self, app: &EphemeralApplication) -> Result<Option<Duration>> {
        let (namespace, name) = identity(app);
        if app.phase() != Phase::Expiring {
            let mut next = app.status.clone().unwrap_or_default();
            next.phase = Phase::Expiring;
            next.message = "Ephemeral environment has expired and is being deleted".to_string();
            set_condition(
                &mut next.conditions,
                ready(app, false, "Expiring", "Environment has expired"),
            );
            self.persist(app, next).await?;
            info!(expiration = %app.spec.expiration_date.0, "Environment expired");
        }

        match self
            .store
            .delete::<EphemeralApplication>(&namespace, &name)
            .await
        {
            Ok(()) => debug!("Deleted record"),
            Err(error) if error.is_not_found() => debug!("Record already deleted"),
            Err(error) => return Err(Error::store(format!("delete {namespace}/{name}"), error)),
        }
        Ok(None)
    }

    /// Removes the environment and then releases the record.
    ///
    /// Each step tolerates work already done so that an interrupted teardown
    /// can be retried from the start.
    async fn teardown(&self, app: &EphemeralApplication) -> Result<()> {
        if !app.has_finalizer() {
            return Ok(());
        }
        let status = app.status.clone().unwrap_or_default();

        if !status.remote_application_name.is_empty() {
            let name = &status.remote_application_name;
            match self
                .applications
                .delete_application(name, &self.config.target.namespace)
                .await
            {
                Ok(()) => info!(application = %name, "Deleted ArgoCD application"),
                Err(error) if error.is_not_found() => {
                    debug!(application = %name, "ArgoCD application already deleted")
                }
                Err(error) => {
                    return Err(Error::application(
                        format!("delete ArgoCD application {name}"),
                        error,
                    ))
                }
            }
        }

        if !status.namespace.is_empty() {
            let ns = &status.namespace;
            match self.store.delete_namespace(ns).await {
                Ok(()) => info!(namespace = %ns, "Deleted namespace"),
                Err(error) if error.is_not_found() => {
                    debug!(namespace = %ns, "Namespace already deleted")
                }
                Err(error) => return Err(Error::store(format!("delete namespace {ns}"), error)),
            }
        }

        let finalizers = app
            .finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect();
        match self.store.set_finalizers(app, finalizers).await {
            Ok(_) => info!("Teardown complete"),
            Err(error) if error.is_not_found() => debug!("Record already released"),
            Err(error) => {
                return Err(Error::store(
                    format!("remove finalizer from {}", app.name_any()),
                    error,
                ))
            }
        }
        Ok(())
    }

    /// Moves the record to `Failed`, recording why.
    async fn fail(
        &self,
        app: &EphemeralApplication,
        reason: &str,
        error: impl fmt::Display,
    ) -> Result<Option<Duration>> {
        let status = app.status.clone().unwrap_or_default();
        self.fail_with(app, status, reason, error).await
    }

    /// Moves the record to `Failed`, keeping what `next` already records.
    async fn fail_with(
        &self,
        app: &EphemeralApplication,
        mut next: EphemeralApplicationStatus,
        reason: &str,
        error: impl fmt::Display,
    ) -> Result<Option<Duration>> {
        warn!(%error, "{reason}");
        next.phase = Phase::Failed;
        next.message = format!("{reason}: {error}");
        set_condition(&mut next.conditions, ready(app, false, "Error", reason));
        self.persist(app, next).await?;
        Ok(Some(self.config.reconcile_interval))
    }

    async fn persist(
        &self,
        app: &EphemeralApplication,
        status: EphemeralApplicationStatus,
    ) -> Result<()> {
        let from = app.phase();
        self.store
            .patch_status(app, &status)
            .await
            .map_err(|e| Error::store(format!("update status of {}", app.name_any()), e))?;
        if from != status.phase {
            info!(%from, to = %status.phase, "Phase changed");
            self.metrics.transition(from, status.phase);
        }
        Ok(())
    }

    async fn get_remote(&self, app: &EphemeralApplication) -> argocd::Result<argocd::Application> {
        let query = ApplicationQuery::named(remote_name(app), &self.config.target.namespace);
        self.applications.get_application(&query).await
    }
}

/// Inserts `condition`, replacing any existing condition of the same type.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

fn ready(app: &EphemeralApplication, ok: bool, reason: &str, message: &str) -> Condition {
    Condition {
        type_: READY.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Time(Utc::now()),
        observed_generation: app.metadata.generation,
    }
}

fn remote_name(app: &EphemeralApplication) -> String {
    app.status
        .as_ref()
        .map(|s| s.remote_application_name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| app.name_any())
}

fn identity(app: &EphemeralApplication) -> (String, String) {
    (app.namespace().unwrap_or_default(), app.name_any())
}
