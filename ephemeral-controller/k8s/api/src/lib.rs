#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod ephemeral_application;
pub mod labels;

pub use self::ephemeral_application::{
    AutomatedSyncPolicy, ConfigMapReference, EphemeralApplication, EphemeralApplicationSpec,
    EphemeralApplicationStatus, Phase, SecretReference, SyncPolicy, FINALIZER,
};
pub use k8s_openapi::{
    api::core::v1::{ConfigMap, Namespace, Secret},
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    ByteString,
};
pub use kube::api::{ObjectMeta, ResourceExt};
pub use kube::{CustomResourceExt, Resource};
