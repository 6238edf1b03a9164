#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
mod controller;
mod interval;
mod lease;

pub use self::{
    args::Args,
    interval::{Interval, ParseError},
};
pub use ephemeral_controller_argocd as argocd;
pub use ephemeral_controller_k8s_api as k8s;
pub use ephemeral_controller_k8s_reconcile as reconcile;
