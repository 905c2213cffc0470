use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::error::ConfigError;

/// Flat, string-keyed configuration layer. Ordered so that resolution never depends on hash order.
pub type ConfigMap = BTreeMap<String, Value>;

pub const MODEL_DIR_ENV: &str = "SM_MODEL_DIR";
pub const OUTPUT_DIR_ENV: &str = "SM_OUTPUT_DATA_DIR";
/// JSON object of the hyperparameters a remote job was submitted with.
pub const HYPERPARAMETERS_ENV: &str = "SM_HPS";

const KNOWN_KEYS: &[&str] = &[
    "num_locations",
    "batch_size",
    "variant_preset",
    "max_epochs",
    "early_stopping_patience",
    "use_accelerator",
    "log_to_experiment_tracker",
    "num_training_samples",
    "num_test_samples",
    "experiment_name",
    "save_model",
    "model_dir",
    "output_dir",
];

pub static DEFAULT_HYPERPARAMETERS: Lazy<ConfigMap> = Lazy::new(|| {
    let defaults = json!({
        "num_locations": 50,
        "batch_size": 64,
        "variant_preset": "single_feat",
        "max_epochs": 50,
        "early_stopping_patience": 10,
        "use_accelerator": true,
        "log_to_experiment_tracker": false,
        "num_training_samples": 1000,
        "num_test_samples": 100,
        "experiment_name": "mtvrp_rl4co_v1",
        "save_model": true,
        "model_dir": "./models",
        "output_dir": "./output",
    });
    match defaults {
        Value::Object(map) => map.into_iter().collect(),
        _ => ConfigMap::new(),
    }
});

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VariantPreset {
    /// Plain capacitated instances.
    Cvrp,
    /// At most one extra constraint per instance.
    SingleFeat,
    /// Every constraint drawn independently.
    All,
}

impl VariantPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantPreset::Cvrp => "cvrp",
            VariantPreset::SingleFeat => "single_feat",
            VariantPreset::All => "all",
        }
    }
}

impl fmt::Display for VariantPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cvrp" => Ok(VariantPreset::Cvrp),
            "single_feat" | "single-feat" => Ok(VariantPreset::SingleFeat),
            "all" | "mixed" => Ok(VariantPreset::All),
            other => Err(ConfigError::UnknownVariantPreset(other.to_string())),
        }
    }
}

/// Immutable configuration of one training/evaluation run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub num_locations: usize,
    /// Instances decoded per pipeline call during evaluation. Training hands the runner the whole sample set.
    pub batch_size: usize,
    pub variant_preset: VariantPreset,
    pub max_epochs: usize,
    pub early_stopping_patience: usize,
    pub use_accelerator: bool,
    pub log_to_experiment_tracker: bool,
    pub num_training_samples: usize,
    pub num_test_samples: usize,
    pub experiment_name: String,
    pub save_model: bool,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl RunConfig {
    /// Hyperparameters as the remote platform expects them: flat, hyphenated, string-valued.
    pub fn to_hyperparameters(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("num-locations".to_string(), self.num_locations.to_string());
        params.insert("batch-size".to_string(), self.batch_size.to_string());
        params.insert("max-epochs".to_string(), self.max_epochs.to_string());
        params.insert("early-stopping-patience".to_string(), self.early_stopping_patience.to_string());
        params.insert("variant-preset".to_string(), self.variant_preset.to_string());
        params.insert("use-accelerator".to_string(), self.use_accelerator.to_string());
        params.insert("log-to-experiment-tracker".to_string(), self.log_to_experiment_tracker.to_string());
        params.insert("num-training-samples".to_string(), self.num_training_samples.to_string());
        params.insert("num-test-samples".to_string(), self.num_test_samples.to_string());
        params.insert("experiment-name".to_string(), self.experiment_name.clone());
        params.insert("save-model".to_string(), self.save_model.to_string());
        params
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join("mtvrp_model.json")
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join("training_results.json")
    }
}

pub struct ConfigResolver;

impl ConfigResolver {
    /// Merges `defaults < overrides < env_paths` into a validated [`RunConfig`].
    pub fn resolve(
        defaults: &ConfigMap,
        overrides: &ConfigMap,
        env_paths: &ConfigMap,
    ) -> Result<RunConfig, ConfigError> {
        let mut merged = ConfigMap::new();
        for layer in [defaults, overrides, env_paths] {
            for (key, value) in layer {
                let key = normalize_key(key);
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    return Err(ConfigError::UnknownKey(key));
                }
                merged.insert(key, value.clone());
            }
        }

        let config = RunConfig {
            num_locations: positive(&merged, "num_locations")?,
            batch_size: positive(&merged, "batch_size")?,
            variant_preset: string(&merged, "variant_preset")?.parse()?,
            max_epochs: positive(&merged, "max_epochs")?,
            early_stopping_patience: unsigned(&merged, "early_stopping_patience")?,
            use_accelerator: boolean(&merged, "use_accelerator")?,
            log_to_experiment_tracker: boolean(&merged, "log_to_experiment_tracker")?,
            num_training_samples: positive(&merged, "num_training_samples")?,
            num_test_samples: positive(&merged, "num_test_samples")?,
            experiment_name: string(&merged, "experiment_name")?,
            save_model: boolean(&merged, "save_model")?,
            model_dir: path(&merged, "model_dir")?,
            output_dir: path(&merged, "output_dir")?,
        };
        Ok(config)
    }

    /// Resolves against the built-in defaults. Submitted hyperparameters sit below `overrides`.
    pub fn resolve_with_defaults(overrides: &ConfigMap) -> Result<RunConfig, ConfigError> {
        let mut layered = hyperparameters_from_env()?;
        layered.extend(overrides.iter().map(|(k, v)| (normalize_key(k), v.clone())));
        Self::resolve(&DEFAULT_HYPERPARAMETERS, &layered, &env_paths_from_env())
    }
}

/// Model and output directories handed to us by the training platform, if any.
pub fn env_paths_from_env() -> ConfigMap {
    let mut paths = ConfigMap::new();
    if let Ok(dir) = env::var(MODEL_DIR_ENV) {
        paths.insert("model_dir".to_string(), Value::String(dir));
    }
    if let Ok(dir) = env::var(OUTPUT_DIR_ENV) {
        paths.insert("output_dir".to_string(), Value::String(dir));
    }
    paths
}

/// Hyperparameters handed to a remote job through [`HYPERPARAMETERS_ENV`], empty when unset.
pub fn hyperparameters_from_env() -> Result<ConfigMap, ConfigError> {
    match env::var(HYPERPARAMETERS_ENV) {
        Ok(raw) if !raw.trim().is_empty() => parse_hyperparameters(&raw),
        _ => Ok(ConfigMap::new()),
    }
}

/// Parses the flat hyperparameter object produced by [`RunConfig::to_hyperparameters`].
pub fn parse_hyperparameters(raw: &str) -> Result<ConfigMap, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: HYPERPARAMETERS_ENV,
        expected: "a JSON object",
        value: raw.to_string(),
    };
    match serde_json::from_str::<Value>(raw).map_err(|_| invalid())? {
        Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (normalize_key(&k), v)).collect()),
        _ => Err(invalid()),
    }
}

/// Parses a `key=value` override. The value stays a string; the resolver coerces it.
pub fn parse_override(raw: &str) -> Result<(String, Value), ConfigError> {
    let (key, value) = raw.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
        key: "override",
        expected: "key=value",
        value: raw.to_string(),
    })?;
    Ok((normalize_key(key), Value::String(value.trim().to_string())))
}

fn normalize_key(key: &str) -> String {
    let key = key.trim().replace('-', "_");
    match key.as_str() {
        "use_gpu" => "use_accelerator".to_string(),
        "log_wandb" => "log_to_experiment_tracker".to_string(),
        _ => key,
    }
}

fn lookup<'a>(map: &'a ConfigMap, key: &'static str) -> Result<&'a Value, ConfigError> {
    map.get(key).ok_or(ConfigError::Missing(key))
}

fn unsigned(map: &ConfigMap, key: &'static str) -> Result<usize, ConfigError> {
    let value = lookup(map, key)?;
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .map(|n| n as usize)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            expected: "a non-negative integer",
            value: value.to_string(),
        })
}

fn positive(map: &ConfigMap, key: &'static str) -> Result<usize, ConfigError> {
    if let Some(Value::Number(n)) = map.get(key) {
        if n.as_i64().is_some_and(|n| n <= 0) || n.as_f64().is_some_and(|n| n <= 0.0) {
            return Err(ConfigError::NonPositive(key));
        }
    }
    if let Some(Value::String(s)) = map.get(key) {
        if s.trim().parse::<i64>().is_ok_and(|n| n <= 0) {
            return Err(ConfigError::NonPositive(key));
        }
    }
    match unsigned(map, key)? {
        0 => Err(ConfigError::NonPositive(key)),
        n => Ok(n),
    }
}

fn boolean(map: &ConfigMap, key: &'static str) -> Result<bool, ConfigError> {
    let value = lookup(map, key)?;
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "t" | "y" | "1" => Some(true),
            "no" | "false" | "f" | "n" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        _ => None,
    };
    parsed.ok_or_else(|| ConfigError::InvalidValue {
        key,
        expected: "a boolean",
        value: value.to_string(),
    })
}

fn string(map: &ConfigMap, key: &'static str) -> Result<String, ConfigError> {
    match lookup(map, key)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ConfigError::InvalidValue {
            key,
            expected: "a string",
            value: other.to_string(),
        }),
    }
}

fn path(map: &ConfigMap, key: &'static str) -> Result<PathBuf, ConfigError> {
    let raw = string(map, key)?;
    if raw.trim().is_empty() {
        return Err(ConfigError::EmptyPath(key));
    }
    Ok(PathBuf::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(value: Value) -> ConfigMap {
        match value {
            Value::Object(m) => m.into_iter().collect(),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn defaults_resolve_to_reference_config() {
        let config = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &ConfigMap::new(), &ConfigMap::new()).unwrap();
        assert_eq!(config.num_locations, 50);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.variant_preset, VariantPreset::SingleFeat);
        assert_eq!(config.early_stopping_patience, 10);
        assert!(config.use_accelerator);
        assert_eq!(config.model_dir, PathBuf::from("./models"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let overrides = map(json!({"num-locations": "20", "use_gpu": "false"}));
        let env_paths = map(json!({"model_dir": "/opt/ml/model"}));
        let a = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &env_paths).unwrap();
        let b = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &env_paths).unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
    }

    #[test]
    fn later_layers_win_and_strings_are_coerced() {
        let overrides = map(json!({"num-locations": "20", "use_gpu": "no", "max_epochs": 5}));
        let env_paths = map(json!({"output_dir": "/opt/ml/output/data"}));
        let config = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &env_paths).unwrap();
        assert_eq!(config.num_locations, 20);
        assert_eq!(config.max_epochs, 5);
        assert!(!config.use_accelerator);
        assert_eq!(config.output_dir, PathBuf::from("/opt/ml/output/data"));
    }

    #[test]
    fn rejects_non_positive_numbers() {
        let overrides = map(json!({"batch_size": 0}));
        let err = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &ConfigMap::new()).unwrap_err();
        assert_eq!(err, ConfigError::NonPositive("batch_size"));

        let overrides = map(json!({"max_epochs": "-3"}));
        let err = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &ConfigMap::new()).unwrap_err();
        assert_eq!(err, ConfigError::NonPositive("max_epochs"));
    }

    #[test]
    fn zero_patience_is_allowed() {
        let overrides = map(json!({"early_stopping_patience": 0}));
        let config = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &ConfigMap::new()).unwrap();
        assert_eq!(config.early_stopping_patience, 0);
    }

    #[test]
    fn rejects_empty_paths_and_unknown_keys() {
        let env_paths = map(json!({"model_dir": "  "}));
        let err = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &ConfigMap::new(), &env_paths).unwrap_err();
        assert_eq!(err, ConfigError::EmptyPath("model_dir"));

        let overrides = map(json!({"learning_rate": "0.1"}));
        let err = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &ConfigMap::new()).unwrap_err();
        assert_eq!(err, ConfigError::UnknownKey("learning_rate".to_string()));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = ConfigResolver::resolve(&ConfigMap::new(), &ConfigMap::new(), &ConfigMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn hyperparameters_are_flat_strings() {
        let config = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &ConfigMap::new(), &ConfigMap::new()).unwrap();
        let params = config.to_hyperparameters();
        assert_eq!(params["num-locations"], "50");
        assert_eq!(params["variant-preset"], "single_feat");
        assert_eq!(params["use-accelerator"], "true");
    }

    #[test]
    fn hyperparameters_resolve_back_to_the_same_config() {
        let config = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &ConfigMap::new(), &ConfigMap::new()).unwrap();
        let overrides: ConfigMap = config
            .to_hyperparameters()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        let again = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &ConfigMap::new()).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn submitted_hyperparameters_rebuild_the_run_config() {
        let overrides = map(json!({
            "num_locations": 20,
            "batch_size": 32,
            "variant_preset": "all",
            "use_accelerator": false,
            "max_epochs": 7,
            "experiment_name": "nightly"
        }));
        let submitted = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &ConfigMap::new()).unwrap();
        let raw = serde_json::to_string(&submitted.to_hyperparameters()).unwrap();

        let hyperparameters = parse_hyperparameters(&raw).unwrap();
        assert_eq!(hyperparameters["num_locations"], json!("20"));
        let remote = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &hyperparameters, &ConfigMap::new()).unwrap();
        assert_eq!(remote, submitted);
    }

    #[test]
    fn malformed_hyperparameters_are_rejected() {
        assert!(matches!(
            parse_hyperparameters("[1, 2]"),
            Err(ConfigError::InvalidValue { key: HYPERPARAMETERS_ENV, .. })
        ));
        assert!(parse_hyperparameters("not json").is_err());
    }

    #[test]
    fn parses_overrides() {
        let (key, value) = parse_override("num-locations=20").unwrap();
        assert_eq!(key, "num_locations");
        assert_eq!(value, Value::String("20".to_string()));
        assert!(parse_override("num_locations").is_err());
    }
}
