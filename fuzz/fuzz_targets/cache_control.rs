#![no_main]

use std::time::{Duration, SystemTime};

use http::{HeaderMap, HeaderValue, StatusCode};
use libfuzzer_sys::fuzz_target;

use streamcache::freshness;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = HeaderValue::from_bytes(data) else {
        return;
    };
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CACHE_CONTROL, value.clone());
    headers.insert(http::header::EXPIRES, value.clone());
    headers.insert(http::header::VARY, value);

    let _ = freshness::parse_cache_control(&headers);

    let request = http::Request::builder()
        .method("GET")
        .uri("http://fuzz.local/")
        .body(())
        .expect("build fuzz request");
    let _ = freshness::response_expiration(
        &request,
        StatusCode::OK,
        &headers,
        &[],
        Duration::from_secs(60),
        SystemTime::now(),
    );
});
