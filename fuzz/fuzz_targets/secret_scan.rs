#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use meta_core::vendor::scan_for_secrets;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let Ok(dir) = tempdir() else {
        return;
    };

    if fs::write(dir.path().join("source.txt"), data).is_err() {
        return;
    }

    let _ = scan_for_secrets(dir.path());
});
