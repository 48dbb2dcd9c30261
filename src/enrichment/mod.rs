//! Postal code enrichment - resolves codes to municipality and district.
//!
//! # Architecture
//!
//! This module follows a clean separation between:
//! - **Domain models** (`domain.rs`) - Canonical codes, locations, outcomes
//! - **Normalization** (`normalize.rs`) - Raw tokens to canonical `NNNN-NNN`
//! - **API DTOs** (`ctt/dto.rs`) - Exact response shapes of the lookup service
//! - **Adapters** (`ctt/adapter.rs`) - Convert DTOs to domain models
//! - **Rate limiting** (`rate_limit.rs`) - Shared rolling budget plus per-worker spacing
//! - **Client** (`client.rs`) - Retry and budget around one [`traits::PostalCodeApi`]
//! - **Service** (`service.rs`) - Worker pool over a batch of tokens
//!
//! # Usage
//!
//! ```ignore
//! use enrichment::{EnrichmentService, EnrichmentConfig};
//!
//! let service = EnrichmentService::with_ctt(&api_key, DEFAULT_BASE_URL, timeout, store, EnrichmentConfig::default())?;
//! for (token, outcome) in service.enrich_batch(tokens).await? {
//!     println!("{token}: {outcome}");
//! }
//! ```

pub mod client;
pub mod ctt;
pub mod domain;
pub mod normalize;
pub mod rate_limit;
pub mod service;
pub mod shutdown;
pub mod traits;

pub use client::{RateLimitedClient, RetryPolicy};
pub use ctt::CttClient;
pub use domain::{CanonicalCode, EnrichmentError, InvalidReason, Location, Outcome};
pub use normalize::normalize;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use service::{BatchSummary, EnrichmentConfig, EnrichmentService};
pub use shutdown::Shutdown;
