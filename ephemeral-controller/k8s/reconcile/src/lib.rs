#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod application;
mod metrics;
mod namegen;
pub mod provision;
mod reconciler;
pub mod store;


pub use self::{
    application::{create_request, Target},
    metrics::ReconcileMetrics,
    namegen::{NameGenerator, MAX_NAME_LEN},
    reconciler::{set_condition, Config, Error, Reconciler, Result, READY},
    store::{KubeStore, Store},
};
