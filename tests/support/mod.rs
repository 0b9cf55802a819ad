#![allow(dead_code)]

mod upstream;
mod writer;

pub use upstream::*;
pub use writer::*;

use std::sync::Arc;

use streamcache::{CacheHandler, Settings, Upstream};

pub const STATUS_HEADER: &str = "x-cache-status";

pub fn settings_with_status_header() -> Settings {
    Settings {
        status_header: Some(STATUS_HEADER.to_string()),
        ..Settings::default()
    }
}

pub async fn handler_for(upstream: Arc<dyn Upstream>) -> CacheHandler {
    CacheHandler::new(settings_with_status_header(), upstream)
        .await
        .expect("build cache handler")
}

pub fn get(uri: &str, headers: &[(&str, &str)]) -> http::Request<()> {
    request("GET", uri, headers)
}

pub fn head(uri: &str) -> http::Request<()> {
    request("HEAD", uri, &[])
}

pub fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> http::Request<()> {
    let mut builder = http::Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).expect("build test request")
}
