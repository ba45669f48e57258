use crate::domain::api::{BatchReceptionResponse, EmissionResponse};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Remote side of the submission flow. The HTTP client is the production
/// implementation; retry policy lives behind this boundary.
#[async_trait]
pub trait DfeTransport: Send + Sync {
    /// Bulk reception: one response entry per payload, in submission order.
    async fn submit_batch(&self, payloads: &[String]) -> Result<BatchReceptionResponse>;

    /// Synchronous emission of a single DPS.
    async fn emit_dps(&self, payload: &str) -> Result<EmissionResponse>;

    async fn health_check(&self) -> bool;
}
