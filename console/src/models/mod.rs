//! Domain models shared by the store, the pipeline and the HTTP layer

pub mod account;
pub mod deployment;
pub mod page;

pub use account::Account;
pub use deployment::{Deployment, DeploymentStatus};
pub use page::{EnvVar, Page};

/// Page identifier
pub type PageId = i64;

/// Deployment identifier
pub type DeploymentId = i64;
