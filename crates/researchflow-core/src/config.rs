use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::stages::PlanBounds;
use crate::PipelineError;

const DEFAULT_CONFIG_PATH: &str = "researchflow.toml";
const CONFIG_PATH_ENV: &str = "RESEARCHFLOW_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub generator: GeneratorConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    pub trace: TraceConfig,
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `RESEARCHFLOW_CONFIG` environment variable.
    /// 3. `researchflow.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Config, PipelineError> {
        let candidate = resolve_path(path);
        Self::load_file(&candidate)
    }

    /// Like [`ConfigLoader::load`], but falls back to built-in defaults when no
    /// file was named explicitly and none exists at the discovered location.
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Config, PipelineError> {
        if path.is_some() {
            return Self::load(path);
        }

        let candidate = resolve_path(None);
        if !candidate.exists() {
            tracing::debug!(path = %candidate.display(), "no config file found; using defaults");
            let config = Config::default();
            Self::validate(&config)?;
            return Ok(config);
        }
        Self::load_file(&candidate)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(raw: &str) -> Result<Config, PipelineError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| PipelineError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Config, PipelineError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| PipelineError::config_io(path.to_path_buf(), err))?;
        Self::from_toml(&raw)
    }

    fn validate(config: &Config) -> Result<(), PipelineError> {
        if config.generator.provider.trim().is_empty() {
            return Err(PipelineError::InvalidConfiguration(
                "generator.provider must not be empty".into(),
            ));
        }

        if !(1..=PipelineConfig::MAX_RESEARCHERS).contains(&config.pipeline.max_researchers) {
            return Err(PipelineError::InvalidConfiguration(format!(
                "pipeline.max_researchers must be between 1 and {}, got {}",
                PipelineConfig::MAX_RESEARCHERS,
                config.pipeline.max_researchers
            )));
        }

        if config.pipeline.min_plan_steps == 0
            || config.pipeline.min_plan_steps > config.pipeline.max_plan_steps
        {
            return Err(PipelineError::InvalidConfiguration(format!(
                "pipeline plan step range {}..={} is invalid",
                config.pipeline.min_plan_steps, config.pipeline.max_plan_steps
            )));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return PathBuf::from(from_env);
        }
    }

    Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub provider: String,
    pub model: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: "stub".to_string(),
            model: "stub-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_researchers: usize,
    pub min_plan_steps: usize,
    pub max_plan_steps: usize,
    pub unused_placeholder: String,
}

impl PipelineConfig {
    pub const DEFAULT_PLACEHOLDER: &'static str = "Not needed for this research plan.";
    /// Upper bound on concurrent research tasks.
    pub const MAX_RESEARCHERS: usize = 3;

    pub fn plan_bounds(&self) -> PlanBounds {
        PlanBounds {
            min_steps: self.min_plan_steps,
            max_steps: self.max_plan_steps,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_researchers: 3,
            min_plan_steps: 3,
            max_plan_steps: 5,
            unused_placeholder: Self::DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("data/traces"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ConfigLoader::from_toml("").unwrap();
        assert_eq!(config.generator.provider, "stub");
        assert_eq!(config.pipeline.max_researchers, 3);
        assert_eq!(config.pipeline.plan_bounds(), PlanBounds::default());
        assert_eq!(
            config.pipeline.unused_placeholder,
            PipelineConfig::DEFAULT_PLACEHOLDER
        );
        assert!(!config.trace.enabled);
    }

    #[test]
    fn loads_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pipeline]
max_researchers = 2
min_plan_steps = 1

[logging]
level = "debug"

[trace]
enabled = true
dir = "out/traces"
"#
        )
        .unwrap();

        let config = ConfigLoader::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.pipeline.max_researchers, 2);
        assert_eq!(config.pipeline.min_plan_steps, 1);
        assert_eq!(config.pipeline.max_plan_steps, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.trace.dir, PathBuf::from("out/traces"));
    }

    #[test]
    fn missing_explicit_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load_or_default(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigIo { .. }));
    }

    #[test]
    fn rejects_zero_researchers() {
        let err = ConfigLoader::from_toml("[pipeline]\nmax_researchers = 0\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_inverted_step_range() {
        let err =
            ConfigLoader::from_toml("[pipeline]\nmin_plan_steps = 6\nmax_plan_steps = 4\n")
                .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_more_than_three_researchers() {
        let err = ConfigLoader::from_toml("[pipeline]\nmax_researchers = 4\n").unwrap_err();
        let PipelineError::InvalidConfiguration(msg) = err else {
            panic!("expected invalid configuration, got {err:?}");
        };
        assert!(msg.contains("between 1 and 3"));
        assert!(ConfigLoader::from_toml("[pipeline]\nmax_researchers = 3\n").is_ok());
    }

    #[test]
    fn generator_section_needs_no_environment() {
        let config =
            ConfigLoader::from_toml("[generator]\nprovider = \"remote\"\nmodel = \"large\"\n")
                .unwrap();
        assert_eq!(config.generator.provider, "remote");
        assert_eq!(config.generator.model, "large");
    }

    #[test]
    fn malformed_toml_is_reported() {
        let err = ConfigLoader::from_toml("[pipeline\nmax_researchers = 3").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    }
}
