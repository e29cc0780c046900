use crate::utils::path_utils::expand_tilde_path_buf;
use anyhow::{Context, Result};
use std::path::PathBuf;

const DEFAULT_FILE_API_URL: &str = "http://localhost:8080";
const DEFAULT_TERMINAL_API_URL: &str = "http://localhost:8081";

#[derive(Debug, Clone)]
pub struct Config {
    pub file_api_url: String,
    pub terminal_api_url: String,
    pub working_dir: PathBuf,
    pub log_level: String,
    pub user_agent: String,
}

fn normalize_base_url(var: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        anyhow::bail!("{} must be an http(s) URL, got '{}'", var, raw);
    }
    Ok(trimmed.to_string())
}

fn default_user_agent() -> String {
    format!("pocketflow-client/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    /// Builds a config in code. Base URLs are validated the same way `load` does.
    pub fn new(
        file_api_url: &str,
        terminal_api_url: &str,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Ok(Config {
            file_api_url: normalize_base_url("file_api_url", file_api_url)?,
            terminal_api_url: normalize_base_url("terminal_api_url", terminal_api_url)?,
            working_dir: working_dir.into(),
            log_level: "info".to_string(),
            user_agent: default_user_agent(),
        })
    }

    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let file_api_url_str =
            std::env::var("FILE_API_URL").unwrap_or_else(|_| DEFAULT_FILE_API_URL.to_string());
        let file_api_url = normalize_base_url("FILE_API_URL", &file_api_url_str)?;

        let terminal_api_url_str = std::env::var("TERMINAL_API_URL")
            .unwrap_or_else(|_| DEFAULT_TERMINAL_API_URL.to_string());
        let terminal_api_url = normalize_base_url("TERMINAL_API_URL", &terminal_api_url_str)?;

        let working_dir = match std::env::var("WORKING_DIR").ok().filter(|s| !s.is_empty()) {
            Some(dir) => expand_tilde_path_buf(&dir),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        if !working_dir.is_absolute() {
            anyhow::bail!("WORKING_DIR must be absolute: {:?}", working_dir);
        }

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let user_agent = std::env::var("USER_AGENT").unwrap_or_else(|_| default_user_agent());

        Ok(Config {
            file_api_url,
            terminal_api_url,
            working_dir,
            log_level,
            user_agent,
        })
    }
}
