//! Shipflow registry integration
//!
//! This crate owns everything that talks to a container registry:
//! credential brokering, the push protocol client, and the idempotent
//! publisher with its publish-record log.

pub mod auth;
pub mod client;
pub mod error;
pub mod pusher;
pub mod record;

pub use auth::{Credential, CredentialBroker};
pub use client::{HttpRegistryClient, RegistryClient};
pub use error::{RegistryError, RegistryResult};
pub use pusher::{
    PublishReport, Publisher, RetryConfig, TagOutcome, split_registry, validate_tag,
};
pub use record::{RecordStore, default_record_path};
