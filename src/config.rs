use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    music::SessionSettings,
    sources::{AudioQuality, StreamOptions},
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    pub maintenance: bool,

    // Cola y búsqueda
    pub max_queue_items: usize,
    pub max_search_results: usize,
    pub max_queue_page_size: usize,
    pub interact_lifetime_mins: u64,
    pub gapi_keys: Vec<String>,

    // UI
    pub primary_color: u32,

    // Conexión de voz (segundos)
    pub ready_timeout_secs: u64,
    pub move_grace_secs: u64,
    pub rejoin_backoff_secs: u64,
    pub max_rejoin_attempts: u32,
    pub stream_open_timeout_secs: u64,

    // Audio
    pub audio_quality: AudioQuality,
    pub prefer_opus: bool,
}

/// Lee `key` con `default` si falta o está vacía.
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} tiene un valor inválido: {}", key, value)),
        _ => Ok(default),
    }
}

fn parse_color(value: &str) -> Result<u32> {
    let hex = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .trim_start_matches('#');
    u32::from_str_radix(hex, 16).with_context(|| format!("PRIMARY_COLOR no es hex: {}", value))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Construye la configuración desde una fuente de variables arbitraria.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        // GAPI_KEY_0, GAPI_KEY_1, ... hasta el primer hueco
        let gapi_keys = (0..)
            .map(|index| lookup(&format!("GAPI_KEY_{}", index)))
            .take_while(|key| key.as_deref().is_some_and(|key| !key.is_empty()))
            .flatten()
            .collect();

        let config = Self {
            // Discord
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.trim().parse().ok()),
            maintenance: parse_or(&lookup, "MAINTENANCE", defaults.maintenance)?,

            // Cola y búsqueda
            max_queue_items: parse_or(&lookup, "MAX_QUEUE_ITEMS", defaults.max_queue_items)?,
            max_search_results: parse_or(&lookup, "MAX_SEARCH_RESULTS", defaults.max_search_results)?,
            max_queue_page_size: parse_or(&lookup, "MAX_QUEUE_PAGE_SIZE", defaults.max_queue_page_size)?,
            interact_lifetime_mins: parse_or(
                &lookup,
                "INTERACT_LIFETIME",
                defaults.interact_lifetime_mins,
            )?,
            gapi_keys,

            // UI
            primary_color: match lookup("PRIMARY_COLOR") {
                Some(value) if !value.trim().is_empty() => parse_color(&value)?,
                _ => defaults.primary_color,
            },

            // Conexión de voz
            ready_timeout_secs: parse_or(&lookup, "READY_TIMEOUT_SECS", defaults.ready_timeout_secs)?,
            move_grace_secs: parse_or(&lookup, "MOVE_GRACE_SECS", defaults.move_grace_secs)?,
            rejoin_backoff_secs: parse_or(&lookup, "REJOIN_BACKOFF_SECS", defaults.rejoin_backoff_secs)?,
            max_rejoin_attempts: parse_or(&lookup, "MAX_REJOIN_ATTEMPTS", defaults.max_rejoin_attempts)?,
            stream_open_timeout_secs: parse_or(
                &lookup,
                "STREAM_OPEN_TIMEOUT_SECS",
                defaults.stream_open_timeout_secs,
            )?,

            // Audio
            audio_quality: parse_or(&lookup, "AUDIO_QUALITY", defaults.audio_quality)?,
            prefer_opus: parse_or(&lookup, "PREFER_OPUS", defaults.prefer_opus)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The Discord token must not be empty
    /// - Queue, search and page sizes must be greater than 0
    /// - Timeouts must be greater than 0
    /// - The color must fit in 24 bits
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN no puede estar vacío");
        }

        if self.max_queue_items == 0 {
            anyhow::bail!("Max queue items must be greater than 0");
        }

        if self.max_search_results == 0 {
            anyhow::bail!("Max search results must be greater than 0");
        }

        if self.max_queue_page_size == 0 {
            anyhow::bail!("Queue page size must be greater than 0");
        }

        if self.interact_lifetime_mins == 0 {
            anyhow::bail!("Interaction lifetime must be greater than 0");
        }

        if self.ready_timeout_secs == 0
            || self.move_grace_secs == 0
            || self.stream_open_timeout_secs == 0
        {
            anyhow::bail!("Voice timeouts must be greater than 0");
        }

        if self.primary_color > 0xFF_FF_FF {
            anyhow::bail!("Primary color must be a 24-bit RGB value, got: {:#X}", self.primary_color);
        }

        Ok(())
    }

    pub fn interact_lifetime(&self) -> Duration {
        Duration::from_secs(self.interact_lifetime_mins * 60)
    }

    /// Tiempos de la política de conexión para cada sesión.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            move_grace: Duration::from_secs(self.move_grace_secs),
            rejoin_backoff: Duration::from_secs(self.rejoin_backoff_secs),
            max_rejoin_attempts: self.max_rejoin_attempts,
            stream_open_timeout: Duration::from_secs(self.stream_open_timeout_secs),
            stream_options: StreamOptions {
                prefer_opus: self.prefer_opus,
                audio_quality: self.audio_quality,
            },
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token and the API keys themselves.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {} (maintenance={})\n  \
            Queue: {} items, {} search results, {} per page, {} interaction lifetime\n  \
            Search: {} API keys\n  \
            Voice: ready {}, move grace {}, backoff {} x{}, stream open {}\n  \
            Audio: {:?} quality, prefer opus={}",
            self.guild_id
                .map_or("global".to_string(), |id| format!("guild {}", id)),
            self.maintenance,
            self.max_queue_items,
            self.max_search_results,
            self.max_queue_page_size,
            humantime::format_duration(self.interact_lifetime()),
            self.gapi_keys.len(),
            humantime::format_duration(Duration::from_secs(self.ready_timeout_secs)),
            humantime::format_duration(Duration::from_secs(self.move_grace_secs)),
            humantime::format_duration(Duration::from_secs(self.rejoin_backoff_secs)),
            self.max_rejoin_attempts,
            humantime::format_duration(Duration::from_secs(self.stream_open_timeout_secs)),
            self.audio_quality,
            self.prefer_opus,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (el token no tiene default)
            discord_token: String::new(),
            guild_id: None,
            maintenance: false,

            max_queue_items: 50,
            max_search_results: 10,
            max_queue_page_size: 10,
            interact_lifetime_mins: 5,
            gapi_keys: Vec::new(),

            primary_color: 0xF5C542,

            ready_timeout_secs: 20,
            move_grace_secs: 20,
            rejoin_backoff_secs: 5,
            max_rejoin_attempts: 5,
            stream_open_timeout_secs: 30,

            audio_quality: AudioQuality::Medium,
            prefer_opus: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "token")])).unwrap();

        assert_eq!(config.max_queue_items, 50);
        assert_eq!(config.max_search_results, 10);
        assert_eq!(config.primary_color, 0xF5C542);
        assert_eq!(config.interact_lifetime(), Duration::from_secs(300));
        assert!(!config.maintenance);
        assert!(config.gapi_keys.is_empty());

        let settings = config.session_settings();
        assert_eq!(settings.ready_timeout, Duration::from_secs(20));
        assert_eq!(settings.rejoin_backoff, Duration::from_secs(5));
        assert_eq!(settings.stream_open_timeout, Duration::from_secs(30));
        assert_eq!(settings.stream_options, StreamOptions::default());
    }

    #[test]
    fn audio_keys_reach_stream_options() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "token"),
            ("AUDIO_QUALITY", "high"),
            ("PREFER_OPUS", "false"),
        ]))
        .unwrap();

        assert_eq!(
            config.session_settings().stream_options,
            StreamOptions {
                prefer_opus: false,
                audio_quality: AudioQuality::High,
            }
        );
        assert!(Config::from_lookup(lookup(&[("DISCORD_TOKEN", "t"), ("AUDIO_QUALITY", "loud")])).is_err());
    }

    #[test]
    fn reads_overrides_and_key_list_until_gap() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "token"),
            ("GUILD_ID", "1234"),
            ("MAX_QUEUE_ITEMS", "20"),
            ("PRIMARY_COLOR", "#00FF00"),
            ("MAINTENANCE", "true"),
            ("GAPI_KEY_0", "k0"),
            ("GAPI_KEY_1", "k1"),
            ("GAPI_KEY_3", "k3"),
        ]))
        .unwrap();

        assert_eq!(config.guild_id, Some(1234));
        assert_eq!(config.max_queue_items, 20);
        assert_eq!(config.primary_color, 0x00FF00);
        assert!(config.maintenance);
        assert_eq!(config.gapi_keys, vec!["k0".to_string(), "k1".to_string()]);
    }

    #[test]
    fn rejects_missing_token_and_bad_values() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("DISCORD_TOKEN", "t"), ("MAX_QUEUE_ITEMS", "lots")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DISCORD_TOKEN", "t"), ("MAX_QUEUE_ITEMS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DISCORD_TOKEN", "t"), ("PRIMARY_COLOR", "zz")])).is_err());
    }

    #[test]
    fn summary_hides_secrets() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            gapi_keys: vec!["api-secret".to_string()],
            ..Config::default()
        };

        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(!summary.contains("api-secret"));
        assert!(summary.contains("1 API keys"));
    }
}
