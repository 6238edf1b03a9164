#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! A thin client for the Argo CD application API.

mod client;
mod error;
mod types;


pub use self::{
    client::{ClientConfig, HttpClient},
    error::{Error, Result},
    types::{
        Application, ApplicationCreateRequest, ApplicationDestination, ApplicationList,
        ApplicationQuery, ApplicationSource, ApplicationSpec, ApplicationStatus, HealthStatus,
        ResourceIgnoreDifferences, SyncPolicy, SyncPolicyAutomated, SyncStatus, HEALTHY, SYNCED,
    },
};
pub use reqwest::StatusCode;

/// Operations on remote applications.
///
/// Lookups and deletes fail with [`Error::NotFound`] when the application does
/// not exist so that callers may treat absence as success where appropriate.
#[async_trait::async_trait]
pub trait Applications: Send + Sync {
    async fn create_application(&self, request: ApplicationCreateRequest) -> Result<Application>;

    async fn get_application(&self, query: &ApplicationQuery) -> Result<Application>;

    /// Lists applications matching the query. An empty query lists everything.
    async fn list_applications(&self, query: &ApplicationQuery) -> Result<Vec<Application>>;

    async fn delete_application(&self, name: &str, namespace: &str) -> Result<()>;
}
