//! CI validation for the sample settings file (settings/example.toml).
//!
//! The sample is what operators copy to configure the CLI, so it must stay
//! syntactically valid TOML, carry every section the loader knows about,
//! and load cleanly through `Settings`.

use aad_token_cache::settings::Settings;
use aad_token_cache::store::DEFAULT_CACHE_PREFIX;
use serde::Deserialize;

/// Raw shape of the sample, checked independently of the loader's defaults.
#[derive(Debug, Deserialize)]
struct Sample {
    authority: toml::Table,
    cache: toml::Table,
    log: toml::Table,
}

fn read_sample() -> String {
    std::fs::read_to_string("settings/example.toml")
        .expect("settings/example.toml should exist and be readable")
}

#[test]
fn sample_settings_is_valid_toml_with_all_sections() {
    let sample: Sample =
        toml::from_str(&read_sample()).expect("settings/example.toml should be valid TOML");

    for key in ["instance", "client_id", "client_secret", "tenant_id", "resource_id"] {
        assert!(
            sample.authority.contains_key(key),
            "authority.{key} should be documented in the sample"
        );
    }
    assert!(sample.cache.contains_key("prefix"));
    assert!(sample.cache.contains_key("expiry_skew_secs"));
    assert!(sample.log.contains_key("filter"));
}

#[test]
fn sample_settings_loads_through_settings() {
    let settings = Settings::from_toml_str(&read_sample()).expect("sample should load");

    assert_eq!(settings.cache.prefix, DEFAULT_CACHE_PREFIX);
    assert_eq!(settings.cache.expiry_skew_secs, 300);
    assert_eq!(settings.authority.resource_id, "https://graph.windows.net");
    assert!(settings.authority.redirect_uri.is_some());
}

#[test]
fn sample_does_not_ship_a_real_secret() {
    let sample: Sample = toml::from_str(&read_sample()).unwrap();
    assert_eq!(
        sample.authority.get("client_secret").and_then(|v| v.as_str()),
        Some("set-via-environment"),
        "the sample secret must stay a placeholder"
    );
}
