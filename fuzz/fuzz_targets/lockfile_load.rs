#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use meta_core::lockfile;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let Ok(workspace) = tempdir() else {
        return;
    };

    let path = lockfile::lock_path(workspace.path(), "dev");
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    if fs::write(&path, data).is_ok() {
        let _ = lockfile::read(workspace.path(), "dev");
    }
});
