#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use opfuzz_common::FuzzConfig;

#[derive(Arbitrary, Debug)]
struct ConfigInput {
    raw_toml: Vec<u8>,
    level: String,
    time_budget: String,
    dim_range: [u16; 2],
    forward_prob: f64,
    filters: Vec<String>,
}

fuzz_target!(|input: ConfigInput| {
    // Parsing and validating arbitrary TOML must never panic.
    if let Ok(text) = std::str::from_utf8(&input.raw_toml)
        && text.len() <= 4096
        && let Ok(config) = FuzzConfig::from_toml_str(text)
    {
        let _ = config.validate();
    }

    let mut config = FuzzConfig::default();
    config.logging.level = input.level;
    config.campaign.time_budget = input.time_budget;
    config.generation.dim_range = input.dim_range.map(usize::from);
    config.generation.forward_prob = input.forward_prob;
    config.filter.active = input.filters.into_iter().take(8).collect();

    // A valid configuration survives its own serialization.
    if config.validate().is_ok() {
        let text = config.to_toml_string().expect("valid config serializes");
        let reparsed = FuzzConfig::from_toml_str(&text).expect("serialized config parses");
        assert!(reparsed.validate().is_ok(), "round trip broke validity:\n{text}");
        assert_eq!(reparsed.generation.dim_range, config.generation.dim_range);
    }
});
