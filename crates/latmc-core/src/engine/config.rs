use crate::core::analysis::rules::MAX_PATH_LENGTH;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Failed to read config '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Failed to parse config '{path}': {message}")]
    Toml { path: String, message: String },
}

/// Settings of one build pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    /// Equality tolerance for fractional coordinates.
    pub geometry_tolerance: f64,
    /// Tolerance used when symmetric energy table entries are compared.
    pub energy_tolerance: f64,
    /// Base seed for simulations without an explicit seed. Unset means random seeds.
    pub fallback_seed: Option<u64>,
    pub max_path_length: usize,
    /// Run independent sub-builds concurrently when the `parallel` feature is on.
    pub parallel: bool,
    /// Decode and re-encode every emitted blob before it is returned.
    pub verify_output: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            geometry_tolerance: 1.0e-6,
            energy_tolerance: 1.0e-9,
            fallback_seed: None,
            max_path_length: MAX_PATH_LENGTH,
            parallel: true,
            verify_output: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FileConfig {
    geometry_tolerance: Option<f64>,
    energy_tolerance: Option<f64>,
    fallback_seed: Option<u64>,
    max_path_length: Option<usize>,
    parallel: Option<bool>,
    verify_output: Option<bool>,
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: display.clone(),
            message: e.to_string(),
        })?;
        let file: FileConfig = toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path: display,
            message: e.to_string(),
        })?;

        let mut builder = BuildConfigBuilder::new().geometry_tolerance(
            file.geometry_tolerance
                .unwrap_or(BuildConfig::default().geometry_tolerance),
        );
        if let Some(value) = file.energy_tolerance {
            builder = builder.energy_tolerance(value);
        }
        if let Some(value) = file.fallback_seed {
            builder = builder.fallback_seed(value);
        }
        if let Some(value) = file.max_path_length {
            builder = builder.max_path_length(value);
        }
        if let Some(value) = file.parallel {
            builder = builder.parallel(value);
        }
        if let Some(value) = file.verify_output {
            builder = builder.verify_output(value);
        }
        builder.build()
    }
}

#[derive(Default)]
pub struct BuildConfigBuilder {
    geometry_tolerance: Option<f64>,
    energy_tolerance: Option<f64>,
    fallback_seed: Option<u64>,
    max_path_length: Option<usize>,
    parallel: Option<bool>,
    verify_output: Option<bool>,
}

impl BuildConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geometry_tolerance(mut self, tolerance: f64) -> Self {
        self.geometry_tolerance = Some(tolerance);
        self
    }
    pub fn energy_tolerance(mut self, tolerance: f64) -> Self {
        self.energy_tolerance = Some(tolerance);
        self
    }
    pub fn fallback_seed(mut self, seed: u64) -> Self {
        self.fallback_seed = Some(seed);
        self
    }
    pub fn max_path_length(mut self, length: usize) -> Self {
        self.max_path_length = Some(length);
        self
    }
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = Some(enabled);
        self
    }
    pub fn verify_output(mut self, enabled: bool) -> Self {
        self.verify_output = Some(enabled);
        self
    }

    pub fn build(self) -> Result<BuildConfig, ConfigError> {
        let defaults = BuildConfig::default();
        let config = BuildConfig {
            geometry_tolerance: self
                .geometry_tolerance
                .ok_or(ConfigError::MissingParameter("geometry_tolerance"))?,
            energy_tolerance: self.energy_tolerance.unwrap_or(defaults.energy_tolerance),
            fallback_seed: self.fallback_seed,
            max_path_length: self.max_path_length.unwrap_or(defaults.max_path_length),
            parallel: self.parallel.unwrap_or(defaults.parallel),
            verify_output: self.verify_output.unwrap_or(defaults.verify_output),
        };

        check_tolerance("geometry_tolerance", config.geometry_tolerance)?;
        check_tolerance("energy_tolerance", config.energy_tolerance)?;
        if !(2..=MAX_PATH_LENGTH).contains(&config.max_path_length) {
            return Err(ConfigError::InvalidParameter {
                name: "max_path_length",
                reason: format!(
                    "{} is outside 2..={MAX_PATH_LENGTH}",
                    config.max_path_length
                ),
            });
        }
        Ok(config)
    }
}

fn check_tolerance(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            reason: format!("{value} is not a positive finite number"),
        })
    }
}
