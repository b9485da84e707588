#![no_main]

use libfuzzer_sys::fuzz_target;
use meta_core::resolver::parse_requirement;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(req) = parse_requirement(text) {
        assert_eq!(req.raw, text);
    }
});
