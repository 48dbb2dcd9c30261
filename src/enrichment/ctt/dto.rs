//! CTT API Data Transfer Objects
//!
//! These types match what the CTT lookup endpoint returns.
//! DO NOT use these types outside the ctt module - convert to domain types.
//!
//! Example response for `GET /api/v1/{key}/4000-100`:
//! ```json
//! [{
//!   "codigo_postal": "4000-100",
//!   "concelho": "Porto",
//!   "distrito": "Porto",
//!   "localidade": "Porto",
//!   "designacao_postal": "PORTO"
//! }]
//! ```

use serde::{Deserialize, Serialize};

/// The endpoint returns a JSON array with one entry per street/address range.
pub type LookupResponse = Vec<AddressEntry>;

/// One address entry for a postal code
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddressEntry {
    /// Municipality
    pub concelho: String,
    /// District
    pub distrito: String,
    /// Postal code as the API formats it
    pub codigo_postal: Option<String>,
    pub localidade: Option<String>,
    pub designacao_postal: Option<String>,
}
