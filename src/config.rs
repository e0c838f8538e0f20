use crate::matches::MatchSettings;
use crate::quiz::QuestionSetShape;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::{fs, io};

pub const CONFIG_PATH_ENV: &str = "PVP_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "pvp.toml";
/// Ten years.
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub store_file: String,
    pub question_count: usize,
    pub choices_per_question: usize,
    /// Empty means the built-in sample set is served.
    pub generator_url: String,
    pub generator_timeout_secs: u64,
    pub default_topics: Vec<String>,
    pub async_match_ttl_hours: i64,
    pub challenge_ttl_hours: i64,
    pub max_transaction_attempts: u32,
    pub rate_limit_window_ms: u64,
    /// 0 disables the background sweep.
    pub expiry_sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            host: "localhost".into(),
            port: 8383,
            workers: 4,
            store_file: "pvp-store.json".into(),
            question_count: 5,
            choices_per_question: 4,
            generator_url: String::new(),
            generator_timeout_secs: 30,
            default_topics: vec!["system design".into()],
            async_match_ttl_hours: 48,
            challenge_ttl_hours: 48,
            max_transaction_attempts: 8,
            rate_limit_window_ms: 1000,
            expiry_sweep_interval_secs: 300,
        }
    }
}

impl ServerConfig {
    pub fn config_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub async fn load_or_create_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig, Box<dyn Error>> {
        let config = if path.as_ref().exists() {
            let config_str: String = fs::read_to_string(&path).await?;
            toml::from_str::<ServerConfig>(&config_str)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        } else {
            let config = ServerConfig::default();
            let toml_str = toml::to_string_pretty(&config)?;
            fs::write(&path, toml_str).await?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.question_count == 0 {
            return Err(String::from("question_count must be at least 1"));
        }
        if self.choices_per_question < 2 {
            return Err(String::from("choices_per_question must be at least 2"));
        }
        for (name, hours) in [
            ("async_match_ttl_hours", self.async_match_ttl_hours),
            ("challenge_ttl_hours", self.challenge_ttl_hours),
        ] {
            if !(1..=MAX_TTL_HOURS).contains(&hours) {
                return Err(format!("{} must be between 1 and {}", name, MAX_TTL_HOURS));
            }
        }
        if self.workers == 0 {
            return Err(String::from("workers must be at least 1"));
        }

        Ok(())
    }

    pub fn question_shape(&self) -> QuestionSetShape {
        QuestionSetShape {
            question_count: self.question_count,
            choices_per_question: self.choices_per_question,
        }
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            async_match_ttl: chrono::Duration::hours(self.async_match_ttl_hours),
            challenge_ttl: chrono::Duration::hours(self.challenge_ttl_hours),
            default_topics: self.default_topics.clone(),
        }
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs)
    }
}
