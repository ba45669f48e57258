pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{cli::LocalStorage, EmissorConfig, ServiceConfig};

pub use adapters::{NfseApiClient, RetryPolicy, SigningCredentials};
pub use core::submission::{SubmissionService, SubmissionSettings};
pub use utils::error::{EmissorError, Result};
