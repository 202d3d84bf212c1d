use log::{debug, info, warn};
use secrecy::SecretString;
use std::env;

pub const REQUIRED_ENV_VARS: &[&str] = &["FIREBASE_WEB_API_KEY"];

// Names of optional environment variables
pub const OPTIONAL_ENV_VARS: &[&str] =
    &["AGENDA_CONFIG_PATH", "GOOGLE_OAUTH_ACCESS_TOKEN", "PORT", "RUST_LOG"];

/// Load variables from a `.env` file in the working directory, if any
pub fn load_env_file() {
    match dotenvy::dotenv() {
        Ok(path) => info!("Loaded environment from {:?}", path),
        Err(e) => debug!("No .env file found or error loading it: {}", e),
    }
}

/// Names of required variables that are unset or blank
pub fn missing_env_vars() -> Vec<&'static str> {
    let missing: Vec<&'static str> =
        REQUIRED_ENV_VARS.iter().copied().filter(|var| get_env_var(var).is_none()).collect();

    for var in &missing {
        warn!("Missing required environment variable: {}", var);
    }
    for var in unset_optional_env_vars() {
        debug!("Optional environment variable not set: {}", var);
    }
    missing
}

/// Optional variables that are unset or blank
pub fn unset_optional_env_vars() -> Vec<&'static str> {
    OPTIONAL_ENV_VARS.iter().copied().filter(|var| get_env_var(var).is_none()).collect()
}

pub fn get_env_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

pub fn secret_env_var(name: &str) -> Option<SecretString> {
    get_env_var(name).map(SecretString::from)
}
