use crate::default_struct;
use std::{env, str::FromStr, time::Duration};
use thiserror::Error;

/// Highest user limit Discord accepts on a voice channel.
pub const USER_LIMIT_CEILING: u32 = 99;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

default_struct! {
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Joining a channel with this name provisions a temporary channel.
    pub trigger_channel_name: String = "➕ Create Channel".to_string(),
    pub category_name: String = "TEMPORARY CHANNELS".to_string(),
    /// `{username}` is replaced by the member's display name.
    pub name_template: String = "{username}'s Channel".to_string(),

    pub delete_delay_ms: u64 = 1000,
    pub default_user_limit: u32 = 0,
    pub max_user_limit: u32 = USER_LIMIT_CEILING,

    pub allow_claim: bool = true,
    pub allow_transfer: bool = true,

    pub sweep_interval_secs: u64 = 60,
    pub invite_max_age_secs: u32 = 3600,
    pub invite_max_uses: u8 = 10,
}
}

impl VoiceConfig {
    /// Builds the config from `TEMPVOICE_*` environment variables, falling back
    /// to the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(name) = env::var("TEMPVOICE_TRIGGER_NAME") {
            config.trigger_channel_name = name;
        }
        if let Ok(name) = env::var("TEMPVOICE_CATEGORY") {
            config.category_name = name;
        }
        if let Ok(template) = env::var("TEMPVOICE_NAME_TEMPLATE") {
            config.name_template = template;
        }

        override_from_env(&mut config.delete_delay_ms, "TEMPVOICE_DELETE_DELAY_MS")?;
        override_from_env(&mut config.default_user_limit, "TEMPVOICE_DEFAULT_LIMIT")?;
        override_from_env(&mut config.max_user_limit, "TEMPVOICE_MAX_LIMIT")?;
        override_from_env(&mut config.allow_claim, "TEMPVOICE_ALLOW_CLAIM")?;
        override_from_env(&mut config.allow_transfer, "TEMPVOICE_ALLOW_TRANSFER")?;
        override_from_env(&mut config.sweep_interval_secs, "TEMPVOICE_SWEEP_SECS")?;
        override_from_env(&mut config.invite_max_age_secs, "TEMPVOICE_INVITE_MAX_AGE")?;
        override_from_env(&mut config.invite_max_uses, "TEMPVOICE_INVITE_MAX_USES")?;

        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        self.max_user_limit = self.max_user_limit.min(USER_LIMIT_CEILING);
        self.default_user_limit = self.default_user_limit.min(self.max_user_limit);
        self.sweep_interval_secs = self.sweep_interval_secs.max(1);
    }

    pub fn delete_delay(&self) -> Duration {
        Duration::from_millis(self.delete_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn channel_name_for(&self, display_name: &str) -> String {
        self.name_template
            .replace("{username}", display_name)
            .chars()
            .take(100)
            .collect()
    }
}

fn override_from_env<T: FromStr>(slot: &mut T, key: &'static str) -> Result<(), ConfigError> {
    if let Ok(value) = env::var(key) {
        *slot = parse_value(key, &value)?;
    }
    Ok(())
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_bot() {
        let config = VoiceConfig::default();
        assert_eq!(config.trigger_channel_name, "➕ Create Channel");
        assert_eq!(config.category_name, "TEMPORARY CHANNELS");
        assert_eq!(config.delete_delay(), Duration::from_millis(1000));
        assert_eq!(config.max_user_limit, 99);
        assert!(config.allow_claim && config.allow_transfer);
    }

    #[test]
    fn channel_name_uses_template_and_caps_length() {
        let config = VoiceConfig::default();
        assert_eq!(config.channel_name_for("Mira"), "Mira's Channel");

        let long = "x".repeat(150);
        assert_eq!(config.channel_name_for(&long).chars().count(), 100);
    }

    #[test]
    fn normalize_clamps_limits() {
        let mut config = VoiceConfig {
            max_user_limit: 250,
            default_user_limit: 180,
            sweep_interval_secs: 0,
            ..Default::default()
        };
        config.normalize();
        assert_eq!(config.max_user_limit, 99);
        assert_eq!(config.default_user_limit, 99);
        assert_eq!(config.sweep_interval_secs, 1);
    }

    #[test]
    fn parse_value_reports_the_key() {
        let err = parse_value::<u64>("TEMPVOICE_DELETE_DELAY_MS", "soon").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value \"soon\" for TEMPVOICE_DELETE_DELAY_MS"
        );
        assert!(parse_value::<bool>("TEMPVOICE_ALLOW_CLAIM", " false ").is_ok());
    }
}
