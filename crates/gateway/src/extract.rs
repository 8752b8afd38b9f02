//! Tenant key lookup at the HTTP edge.

use {axum::http::HeaderMap, serde::Deserialize};

#[derive(Debug, Default, Deserialize)]
pub struct TenantQuery {
    #[serde(default)]
    pub tenant: Option<String>,
}

/// Raw tenant key from the configured header, else the `tenant` query
/// parameter. Blank values count as absent.
pub fn requested_tenant(headers: &HeaderMap, header_name: &str, query: &TenantQuery) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| query.tenant.as_deref().map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use {super::*, axum::http::HeaderValue};

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-key", HeaderValue::from_static(" acme "));
        let query = TenantQuery {
            tenant: Some("other".into()),
        };
        assert_eq!(
            requested_tenant(&headers, "x-tenant-key", &query).as_deref(),
            Some("acme")
        );
    }

    #[test]
    fn falls_back_to_query_then_absent() {
        let headers = HeaderMap::new();
        let query = TenantQuery {
            tenant: Some("other".into()),
        };
        assert_eq!(
            requested_tenant(&headers, "x-tenant-key", &query).as_deref(),
            Some("other")
        );
        assert!(requested_tenant(&headers, "x-tenant-key", &TenantQuery::default()).is_none());

        let blank = TenantQuery {
            tenant: Some("  ".into()),
        };
        assert!(requested_tenant(&headers, "x-tenant-key", &blank).is_none());
    }
}
