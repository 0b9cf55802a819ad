#![no_main]

use libfuzzer_sys::fuzz_target;

use streamcache::request_key;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(uri) = s.parse::<http::Uri>() else {
        return;
    };
    let Ok(request) = http::Request::builder().method("GET").uri(uri).body(()) else {
        return;
    };
    let _ = request_key(&request);
});
