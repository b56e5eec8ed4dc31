// Reads the verified tenant identifier off an inbound request

use crate::error::{Result, TenantError};
use axum::http::{Extensions, HeaderMap, HeaderName};

/// Tenant identity established by an in-process authentication layer.
///
/// Inserted as a request extension; takes precedence over the trusted header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTenant(pub String);

#[derive(Debug, Clone)]
pub struct TenantExtractor {
    header: HeaderName,
}

impl TenantExtractor {
    /// `header` is the trusted header set by the authenticating proxy
    pub fn new(header: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(header.trim().to_ascii_lowercase().as_bytes())
            .map_err(|e| {
                TenantError::InvalidConfig(format!("invalid identity header '{}': {}", header, e))
            })?;
        Ok(Self { header })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// The presented identifier, if any. Blank values count as absent.
    pub fn extract(&self, extensions: &Extensions, headers: &HeaderMap) -> Option<String> {
        if let Some(VerifiedTenant(id)) = extensions.get::<VerifiedTenant>() {
            return Some(id.clone()).filter(|id| !id.trim().is_empty());
        }

        headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_extraction() {
        let extractor = TenantExtractor::new("X-Verified-Tenant").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-verified-tenant", HeaderValue::from_static(" acme "));

        assert_eq!(
            extractor.extract(&Extensions::new(), &headers),
            Some("acme".to_string())
        );
    }

    #[test]
    fn test_extension_wins_over_header() {
        let extractor = TenantExtractor::new("x-verified-tenant").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-verified-tenant", HeaderValue::from_static("spoofed"));
        let mut extensions = Extensions::new();
        extensions.insert(VerifiedTenant("acme".to_string()));

        assert_eq!(
            extractor.extract(&extensions, &headers),
            Some("acme".to_string())
        );
    }

    #[test]
    fn test_blank_identity_is_absent() {
        let extractor = TenantExtractor::new("x-verified-tenant").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-verified-tenant", HeaderValue::from_static("   "));

        assert_eq!(extractor.extract(&Extensions::new(), &headers), None);
        assert_eq!(extractor.extract(&Extensions::new(), &HeaderMap::new()), None);
    }

    #[test]
    fn test_invalid_header_name() {
        assert!(matches!(
            TenantExtractor::new("bad header"),
            Err(TenantError::InvalidConfig(_))
        ));
    }
}
