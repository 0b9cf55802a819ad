use http::HeaderMap;
use http::header::HeaderName;
use serde::Deserialize;

/// Operator-configured admission rule. Rules are evaluated in order against
/// the request and the upstream response headers; the first match makes the
/// response cacheable with the configured default lifetime when the origin
/// supplied no explicit freshness.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheRule {
    /// Matches when the request path starts with the configured prefix.
    PathPrefix { path: String },
    /// Matches when a response header carries one of the allowed values.
    HeaderValue { header: String, values: Vec<String> },
}

impl CacheRule {
    pub fn matches(&self, request: &http::Request<()>, response_headers: &HeaderMap) -> bool {
        match self {
            CacheRule::PathPrefix { path } => request.uri().path().starts_with(path.as_str()),
            CacheRule::HeaderValue { header, values } => {
                let Ok(name) = HeaderName::try_from(header.as_str()) else {
                    return false;
                };
                response_headers.get_all(&name).iter().any(|value| {
                    value
                        .to_str()
                        .map(|value| values.iter().any(|allowed| allowed == value))
                        .unwrap_or(false)
                })
            }
        }
    }
}
