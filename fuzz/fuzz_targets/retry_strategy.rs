#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use meta_core::retry::{calculate_delay, RetryConfig};

fuzz_target!(|data: (u32, u32, u64, u8)| {
    let (attempt, max_attempts, base_ms, jitter_byte) = data;

    let attempt = attempt % 100;
    let base_delay = Duration::from_millis(base_ms % 10_000 + 1);
    let max_delay = Duration::from_secs(60);
    let jitter = (jitter_byte as f64) / 255.0;

    let config = RetryConfig {
        max_attempts,
        base_delay,
        max_delay,
        jitter,
    };

    let delay = calculate_delay(&config, attempt);

    if jitter == 0.0 {
        assert!(delay <= max_delay);
    }
});