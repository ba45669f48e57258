// Concrete implementations of the domain ports: certificate material and the
// national API client.

pub mod certificate;
pub mod http;

pub use certificate::{CertificateInfo, SigningCredentials};
pub use http::{NfseApiClient, RetryPolicy};
