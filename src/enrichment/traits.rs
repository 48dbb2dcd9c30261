//! Trait definitions for the external lookup API.
//!
//! The rate-limited client and the dispatcher are generic over
//! [`PostalCodeApi`], so tests can substitute scripted implementations for
//! the real HTTP client.
//!
//! # Example
//!
//! ```ignore
//! use postal_enricher::enrichment::traits::PostalCodeApi;
//!
//! // In production code:
//! async fn process<T: PostalCodeApi>(api: &T, code: &CanonicalCode) {
//!     let location = api.lookup(code).await?;
//! }
//!
//! // In tests:
//! let api = ScriptedApi::always(Ok(location));
//! ```

use async_trait::async_trait;

use super::domain::{CanonicalCode, EnrichmentError, Location};

/// One lookup attempt against the postal code service.
///
/// Implementations issue exactly one request per call and classify the
/// result; they never retry or rate limit on their own.
#[async_trait]
pub trait PostalCodeApi: Send + Sync {
    async fn lookup(&self, code: &CanonicalCode) -> Result<Location, EnrichmentError>;
}

#[async_trait]
impl PostalCodeApi for super::ctt::CttClient {
    async fn lookup(&self, code: &CanonicalCode) -> Result<Location, EnrichmentError> {
        self.lookup(code).await
    }
}
