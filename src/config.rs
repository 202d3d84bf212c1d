use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use directories::ProjectDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// Falls back to the metadata server when unset
    pub project_id: Option<String>,
    pub location: String,
    pub vision_model: String,
    pub database: String,
    pub identity_endpoint: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Firestore,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub timezone: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_weeks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub bucket: String,
    /// Downloaded artifacts are kept here and reused by later cold starts
    pub cache_dir: PathBuf,
    pub kmeans_preprocessor: String,
    pub kmeans_model: String,
    pub regression_preprocessor: String,
    pub regression_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub threshold: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:8080".to_string(), request_timeout_secs: 120 }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: "us-central1".to_string(),
            vision_model: "gemini-2.5-pro".to_string(),
            database: "(default)".to_string(),
            identity_endpoint: "https://identitytoolkit.googleapis.com/v1/accounts:lookup"
                .to_string(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Mexico_City".to_string(),
            temperature: 0.1,
            max_output_tokens: 8192,
            max_weeks: crate::schedule::DEFAULT_MAX_WEEKS,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            bucket: "agenda-b616a-models".to_string(),
            cache_dir: PathBuf::from("/tmp/agenda-models"),
            kmeans_preprocessor: "preprocessor_kmeans.json".to_string(),
            kmeans_model: "modelo_kmeans_4clusters.json".to_string(),
            regression_preprocessor: "preprocessor_regresion.json".to_string(),
            regression_model: "modelo_regresion_aprobacion.json".to_string(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self { threshold: 0.6 }
    }
}

impl Config {
    /// Load from an explicit path, `AGENDA_CONFIG_PATH`, or the user config dir.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => get_config_path()?,
        };

        if !config_path.exists() {
            info!("No config file at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.timezone()?;
        Ok(config)
    }

    /// Reference timezone for imported events
    pub fn timezone(&self) -> Result<Tz> {
        self.import
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Invalid timezone '{}': {}", self.import.timezone, e))
    }

    /// Address to listen on; a `PORT` variable (set by Cloud Run) wins
    pub fn bind_address(&self) -> String {
        match crate::env_manager::get_env_var("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => self.server.bind_address.clone(),
        }
    }
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = crate::env_manager::get_env_var("AGENDA_CONFIG_PATH") {
        return Ok(PathBuf::from(path));
    }

    let proj_dirs = ProjectDirs::from("com", "agenda", "agenda")
        .context("Failed to determine config directory")?;

    Ok(proj_dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.import.timezone, "America/Mexico_City");
        assert_eq!(config.google.vision_model, "gemini-2.5-pro");
        assert_eq!(config.store.backend, StoreBackend::Firestore);
        assert_eq!(config.risk.threshold, 0.6);
        assert_eq!(config.timezone().unwrap(), chrono_tz::America::Mexico_City);
    }

    #[test]
    fn test_partial_config_keeps_defaults() -> Result<()> {
        let config = Config::from_toml_str(
            r#"
            [store]
            backend = "memory"

            [google]
            project_id = "agenda-test"
            "#,
        )?;
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.google.project_id.as_deref(), Some("agenda-test"));
        assert_eq!(config.google.location, "us-central1");
        assert_eq!(config.import.max_output_tokens, 8192);
        assert_eq!(config.import.max_weeks, 104);
        Ok(())
    }

    #[test]
    fn test_import_horizon_override() -> Result<()> {
        let config = Config::from_toml_str("[import]\nmax_weeks = 20")?;
        assert_eq!(config.import.max_weeks, 20);
        assert_eq!(config.import.timezone, "America/Mexico_City");
        Ok(())
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let result = Config::from_toml_str(
            r#"
            [import]
            timezone = "Mars/Olympus_Mons"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_config_load_from_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[risk]\nthreshold = 0.75")?;

        let loaded = Config::load(Some(file.path()))?;
        assert_eq!(loaded.risk.threshold, 0.75);
        Ok(())
    }

    #[test]
    fn test_missing_file_uses_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let loaded = Config::load(Some(&dir.path().join("absent.toml")))?;
        assert_eq!(loaded.server.bind_address, "0.0.0.0:8080");
        Ok(())
    }
}
