// src/config/mod.rs
// All tunables come from the environment (.env supported), with defaults
// that work for local development.

use once_cell::sync::Lazy;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct MermendConfig {
    // ── Backend selection
    pub backend: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub deepseek_api_key: Option<String>,
    pub deepseek_model: String,
    pub max_output_tokens: u32,

    // ── Repair loop
    pub max_steps: usize,
    pub max_hints: usize,
    pub run_timeout_secs: u64,

    // ── Server
    pub host: String,
    pub port: u16,
    pub cors_origin: String,

    // ── Logging
    pub log_level: String,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            let clean_val = val.split('#').next().unwrap_or("").trim();
            match clean_val.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl MermendConfig {
    pub fn from_env() -> Self {
        // Best effort; missing .env just means plain environment variables.
        let _ = dotenvy::dotenv();

        Self {
            backend: env_var_or("MERMEND_BACKEND", "anthropic".to_string()),
            anthropic_api_key: env_var_opt("ANTHROPIC_API_KEY"),
            anthropic_model: env_var_or("MERMEND_ANTHROPIC_MODEL", "claude-sonnet-4-0".to_string()),
            deepseek_api_key: env_var_opt("DEEPSEEK_API_KEY"),
            deepseek_model: env_var_or("MERMEND_DEEPSEEK_MODEL", "deepseek-chat".to_string()),
            max_output_tokens: env_var_or("MERMEND_MAX_OUTPUT_TOKENS", 4096),
            max_steps: env_var_or("MERMEND_MAX_STEPS", 4),
            max_hints: env_var_or("MERMEND_MAX_HINTS", 4),
            run_timeout_secs: env_var_or("MERMEND_RUN_TIMEOUT_SECS", 120),
            host: env_var_or("MERMEND_HOST", "0.0.0.0".to_string()),
            port: env_var_or("MERMEND_PORT", 3400),
            cors_origin: env_var_or("MERMEND_CORS_ORIGIN", "http://localhost:3000".to_string()),
            log_level: env_var_or("MERMEND_LOG_LEVEL", "info".to_string()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn run_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.run_timeout_secs)
    }

    pub fn is_debug(&self) -> bool {
        self.log_level.to_lowercase() == "debug"
    }
}

// Global config instance - loaded once at startup
pub static CONFIG: Lazy<MermendConfig> = Lazy::new(MermendConfig::from_env);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MermendConfig::from_env();

        assert_eq!(config.backend, "anthropic");
        assert!(config.max_steps >= 1);
        assert!(config.max_hints >= 1);
    }

    #[test]
    fn test_bind_address() {
        let config = MermendConfig::from_env();
        assert!(config.bind_address().contains(':'));
    }
}
