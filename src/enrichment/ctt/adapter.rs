//! Adapter layer: Convert CTT DTOs to domain models

use super::dto;
use crate::enrichment::domain::{EnrichmentError, Location};

/// Take the first entry of a lookup response.
///
/// All entries for one postal code share the same municipality and district,
/// so the first one is as good as any. An empty array means the service has
/// nothing for this code.
pub fn to_location(response: dto::LookupResponse) -> Result<Location, EnrichmentError> {
    let entry = response.into_iter().next().ok_or(EnrichmentError::NoMatches)?;

    Ok(Location {
        municipality: entry.concelho.trim().to_string(),
        district: entry.distrito.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(concelho: &str, distrito: &str) -> dto::AddressEntry {
        dto::AddressEntry {
            concelho: concelho.to_string(),
            distrito: distrito.to_string(),
            codigo_postal: None,
            localidade: None,
            designacao_postal: None,
        }
    }

    #[test]
    fn test_first_entry_wins() {
        let location = to_location(vec![entry("Porto", "Porto"), entry("Maia", "Porto")]).unwrap();
        assert_eq!(location.municipality, "Porto");
        assert_eq!(location.district, "Porto");
    }

    #[test]
    fn test_trims_whitespace() {
        let location = to_location(vec![entry(" Vila Nova de Gaia ", "Porto\n")]).unwrap();
        assert_eq!(location.municipality, "Vila Nova de Gaia");
        assert_eq!(location.district, "Porto");
    }

    #[test]
    fn test_empty_response_is_no_match() {
        assert!(matches!(to_location(vec![]), Err(EnrichmentError::NoMatches)));
    }
}
