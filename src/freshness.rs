use std::time::{Duration, SystemTime};

use http::{HeaderMap, Method, StatusCode};

use crate::rules::CacheRule;

/// Response `Cache-Control` directives that matter for admission. Tokens are
/// split on commas and semicolons and compared case-insensitively; malformed
/// directives are ignored rather than rejected.
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    pub private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<Duration>,
}

pub fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers.get_all(http::header::CACHE_CONTROL) {
        if let Ok(s) = value.to_str() {
            for part in s.split([',', ';']) {
                let part = part.trim().to_ascii_lowercase();
                if part == "private" {
                    cc.private = true;
                } else if part == "no-cache" {
                    cc.no_cache = true;
                } else if part == "no-store" {
                    cc.no_store = true;
                } else if let Some(stripped) = part.strip_prefix("max-age=")
                    && let Ok(secs) = stripped.trim().parse::<u64>()
                {
                    cc.max_age = Some(Duration::from_secs(secs));
                }
            }
        }
    }
    cc
}

/// Only GET and HEAD requests are eligible; everything else bypasses the
/// cache entirely.
pub fn request_is_cacheable(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

/// Decides whether a response may be stored and, if so, when it goes stale.
///
/// Freshness comes from the first of: a positive `max-age`, a future
/// `Expires`, or a matching operator rule combined with `default_max_age`.
/// Returns `None` when the response must not be cached.
pub fn response_expiration(
    request: &http::Request<()>,
    status: StatusCode,
    headers: &HeaderMap,
    rules: &[CacheRule],
    default_max_age: Duration,
    now: SystemTime,
) -> Option<SystemTime> {
    let cc = parse_cache_control(headers);
    if cc.private || cc.no_cache || cc.no_store {
        return None;
    }

    if vary_forbids_caching(headers) {
        return None;
    }

    if !replayable_status(status) {
        return None;
    }

    if let Some(max_age) = cc.max_age
        && max_age > Duration::ZERO
    {
        return Some(now + max_age);
    }

    if let Some(expires) = parse_expires(headers)
        && expires > now
    {
        return Some(expires);
    }

    if rules.iter().any(|rule| rule.matches(request, headers)) {
        return Some(now + default_max_age);
    }

    None
}

/// A `Vary: *` response cannot be matched by any later request.
fn vary_forbids_caching(headers: &HeaderMap) -> bool {
    headers.get_all(http::header::VARY).iter().any(|value| {
        value
            .to_str()
            .map(|s| s.split(',').any(|name| name.trim() == "*"))
            .unwrap_or(false)
    })
}

fn replayable_status(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection() || status == StatusCode::NOT_FOUND
}

fn parse_expires(headers: &HeaderMap) -> Option<SystemTime> {
    let value = headers.get(http::header::EXPIRES)?;
    let value = value.to_str().ok()?;
    httpdate::parse_http_date(value).ok()
}
