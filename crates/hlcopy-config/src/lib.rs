//! Layered configuration loading and canonicalization.
//!
//! `load_layered_yaml` / `deep_merge` / `canonicalize_json` are carried over
//! unchanged from the upstream config crate this was built from; `load`
//! builds on top of them with an environment-variable overlay (the source
//! spec names concrete env vars the plain YAML loader never covered) and
//! maps the merged JSON into a typed `Config`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// Typed Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub top_n: usize,
    pub softmax_temperature: f64,
    pub ml_override_enabled: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            top_n: 15,
            softmax_temperature: 1.0,
            ml_override_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub per_trader_weight_cap: f64,
    pub per_token_gross_cap: f64,
    pub directional_cap: f64,
    pub max_leverage: f64,
    pub min_trade_size: f64,
    pub adjust_threshold: f64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            per_trader_weight_cap: 0.20,
            per_token_gross_cap: 0.35,
            directional_cap: 0.70,
            max_leverage: 5.0,
            min_trade_size: 50.0,
            // §9 open question: resolved as 10% default.
            adjust_threshold: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub slippage_bps: f64,
    pub stop_loss_bps: f64,
    pub trailing_bps: f64,
    pub max_hold_duration_secs: i64,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 10.0,
            stop_loss_bps: 500.0,
            trailing_bps: 300.0,
            max_hold_duration_secs: 7 * 24 * 3600,
            poll_attempts: 5,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub refresh_interval_secs: i64,
    pub rebalance_interval_secs: i64,
    pub monitor_interval_secs: i64,
    pub ingest_interval_secs: i64,
    pub missed_tick_threshold_secs: i64,
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 24 * 3600,
            rebalance_interval_secs: 4 * 3600,
            monitor_interval_secs: 60,
            ingest_interval_secs: 5 * 60,
            missed_tick_threshold_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub account_value: f64,
    pub paper_trade: bool,
    pub database_url: String,
    pub api_key: String,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(skip)]
    pub config_hash: String,
}

/// Assemble the full `Config`: layered YAML files, then environment variable
/// overrides for the handful of fields the source spec names explicitly.
pub fn load(paths: &[&str]) -> Result<Config> {
    let loaded = load_layered_yaml(paths).context("loading layered yaml config")?;
    let mut cfg: Config =
        serde_json::from_value(loaded.config_json).context("mapping config json to Config")?;
    cfg.config_hash = loaded.config_hash;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PAPER_TRADE") {
        cfg.paper_trade = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("ACCOUNT_VALUE") {
        if let Ok(parsed) = v.parse::<f64>() {
            cfg.account_value = parsed;
        }
    }
    if let Ok(v) = std::env::var("DATABASE_URL") {
        cfg.database_url = v;
    }
    if let Ok(v) = std::env::var("HL_COPYTRADE_API_KEY") {
        cfg.api_key = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_yaml(contents: &str) -> tempfile_path::TempYaml {
        tempfile_path::TempYaml::new(contents)
    }

    // Minimal self-contained temp-file helper so this crate does not need a
    // `tempfile` dev-dependency for a single test module.
    mod tempfile_path {
        use std::io::Write;
        pub struct TempYaml {
            pub path: std::path::PathBuf,
        }
        impl TempYaml {
            pub fn new(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("hlcopy_config_test_{}.yaml", uuid_like()));
                let mut f = std::fs::File::create(&path).unwrap();
                f.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }
        impl Drop for TempYaml {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
        fn uuid_like() -> u64 {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos() as u64
        }
    }

    #[test]
    fn deep_merge_later_file_overrides_earlier() {
        let base = write_temp_yaml("account_value: 10000\npaper_trade: true\n");
        let overlay = write_temp_yaml("account_value: 50000\n");
        let loaded = load_layered_yaml(&[
            base.path.to_str().unwrap(),
            overlay.path.to_str().unwrap(),
        ])
        .unwrap();
        assert_eq!(loaded.config_json["account_value"], 50000.0);
        assert_eq!(loaded.config_json["paper_trade"], true);
    }

    #[test]
    fn canonical_json_is_key_sorted() {
        let f = write_temp_yaml("b: 1\na: 2\n");
        let loaded = load_layered_yaml(&[f.path.to_str().unwrap()]).unwrap();
        let a_pos = loaded.canonical_json.find("\"a\"").unwrap();
        let b_pos = loaded.canonical_json.find("\"b\"").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn hash_is_deterministic_for_same_content() {
        let f1 = write_temp_yaml("account_value: 1\n");
        let f2 = write_temp_yaml("account_value: 1\n");
        let l1 = load_layered_yaml(&[f1.path.to_str().unwrap()]).unwrap();
        let l2 = load_layered_yaml(&[f2.path.to_str().unwrap()]).unwrap();
        assert_eq!(l1.config_hash, l2.config_hash);
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        let f = write_temp_yaml(
            "account_value: 10000\npaper_trade: false\ndatabase_url: \"postgres://file\"\napi_key: \"file-key\"\n",
        );
        std::env::set_var("ACCOUNT_VALUE", "99999");
        std::env::set_var("PAPER_TRADE", "true");
        let cfg = load(&[f.path.to_str().unwrap()]).unwrap();
        std::env::remove_var("ACCOUNT_VALUE");
        std::env::remove_var("PAPER_TRADE");
        assert_eq!(cfg.account_value, 99999.0);
        assert!(cfg.paper_trade);
    }

    #[test]
    fn defaults_fill_in_when_sections_absent() {
        let f = write_temp_yaml(
            "account_value: 10000\npaper_trade: true\ndatabase_url: \"postgres://x\"\napi_key: \"k\"\n",
        );
        let cfg = load(&[f.path.to_str().unwrap()]).unwrap();
        assert_eq!(cfg.scoring.top_n, 15);
        assert_eq!(cfg.portfolio.adjust_threshold, 0.10);
        assert_eq!(cfg.execution.poll_attempts, 5);
        assert_eq!(cfg.scheduler.monitor_interval_secs, 60);
        assert!(!cfg.config_hash.is_empty());
    }
}
