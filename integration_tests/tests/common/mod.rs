use std::fs;
use std::path::PathBuf;
use std::sync::Once;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

static INIT: Once = Once::new();

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = fixture_path("test_attribution_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test attribution config at {}",
            config_path.display()
        );

        std::env::set_var("ATTRIBUTION_CONFIG_PATH", &config_path);
    });
}

pub fn load_fixture<T: DeserializeOwned>(name: &str) -> Result<T> {
    let path = fixture_path(name);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}
