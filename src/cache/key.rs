use http::HeaderMap;
use http::header::{self, HeaderName};
use url::form_urlencoded;

/// Builds the cache key: method, authority, path, and the query string with
/// its pairs sorted so that parameter order does not split the cache.
pub fn request_key(request: &http::Request<()>) -> String {
    let uri = request.uri();
    let authority = uri
        .authority()
        .map(|authority| authority.as_str())
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
        })
        .unwrap_or_default();

    let mut key = format!("{} {}{}", request.method(), authority, uri.path());
    if let Some(query) = uri.query() {
        let canonical = canonical_query(query);
        if !canonical.is_empty() {
            key.push('?');
            key.push_str(&canonical);
        }
    }
    key
}

fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    pairs.sort();
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    serializer.extend_pairs(pairs);
    serializer.finish()
}

/// Vary comparison between a stored entry and the current request: for every
/// header named in the stored response's `Vary`, the current request must
/// carry exactly the value list the recorded request carried. A literal `*`
/// forbids any match.
pub fn vary_match(
    response_headers: &HeaderMap,
    stored_request: &HeaderMap,
    request: &HeaderMap,
) -> bool {
    for value in response_headers.get_all(header::VARY) {
        let Ok(list) = value.to_str() else {
            return false;
        };
        for name in list.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if name == "*" {
                return false;
            }
            let Ok(name) = HeaderName::try_from(name) else {
                return false;
            };
            let stored: Vec<_> = stored_request.get_all(&name).iter().collect();
            let current: Vec<_> = request.get_all(&name).iter().collect();
            if stored != current {
                return false;
            }
        }
    }
    true
}
