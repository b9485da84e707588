#![no_main]

use libfuzzer_sys::fuzz_target;
use meta_core::manifest::{ComponentsFile, EnvironmentsFile, FeaturesFile};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(components) = serde_yaml::from_str::<ComponentsFile>(text) {
        if let Ok(serialized) = serde_yaml::to_string(&components) {
            let reparsed: ComponentsFile =
                serde_yaml::from_str(&serialized).expect("round-trip of a value we just produced must parse");
            assert_eq!(components.components.len(), reparsed.components.len());
        }
    }

    let _ = serde_yaml::from_str::<EnvironmentsFile>(text);
    let _ = serde_yaml::from_str::<FeaturesFile>(text);
});
