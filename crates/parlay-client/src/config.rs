use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Lifetime requested for profile picture signed URLs.
    pub signed_url_ttl: Duration,
    /// Cached URLs this close to expiry are signed again.
    pub signed_url_refresh_margin: Duration,
    /// How often the check-in tracker re-reads the event status.
    pub checkin_poll: Duration,
    pub profile_picture_prefix: String,
    /// Picker compression, 0.0..=1.0.
    pub image_quality: f32,
    pub storage_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signed_url_ttl: Duration::from_secs(3600),
            signed_url_refresh_margin: Duration::from_secs(60),
            checkin_poll: Duration::from_secs(30),
            profile_picture_prefix: "profile-pictures".into(),
            image_quality: 0.7,
            storage_url: None,
        }
    }
}

impl ClientConfig {
    /// Read `PARLAY_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            signed_url_ttl: secs(&lookup, "PARLAY_SIGNED_URL_TTL_SECS", defaults.signed_url_ttl)?,
            signed_url_refresh_margin: secs(
                &lookup,
                "PARLAY_SIGNED_URL_REFRESH_MARGIN_SECS",
                defaults.signed_url_refresh_margin,
            )?,
            checkin_poll: secs(&lookup, "PARLAY_CHECKIN_POLL_SECS", defaults.checkin_poll)?,
            profile_picture_prefix: lookup("PARLAY_PROFILE_PICTURE_PREFIX")
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.profile_picture_prefix),
            image_quality: parsed(&lookup, "PARLAY_IMAGE_QUALITY", defaults.image_quality)?,
            storage_url: lookup("PARLAY_STORAGE_URL").filter(|u| !u.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.image_quality) {
            return Err(ClientError::Config(format!(
                "PARLAY_IMAGE_QUALITY must be within 0..=1, got {}",
                self.image_quality
            )));
        }
        if self.checkin_poll.is_zero() {
            return Err(ClientError::Config("PARLAY_CHECKIN_POLL_SECS must be > 0".into()));
        }
        if self.signed_url_refresh_margin >= self.signed_url_ttl {
            return Err(ClientError::Config(
                "signed URL refresh margin must be shorter than its TTL".into(),
            ));
        }
        Ok(())
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ClientError::Config(format!("{}: {}", key, e))),
        None => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parsed(lookup, key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.checkin_poll, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("PARLAY_CHECKIN_POLL_SECS", "10"),
            ("PARLAY_PROFILE_PICTURE_PREFIX", "/avatars/"),
            ("PARLAY_STORAGE_URL", "https://files.example.com"),
        ]))
        .unwrap();
        assert_eq!(config.checkin_poll, Duration::from_secs(10));
        assert_eq!(config.profile_picture_prefix, "avatars");
        assert_eq!(config.storage_url.as_deref(), Some("https://files.example.com"));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(ClientConfig::from_lookup(lookup(&[("PARLAY_CHECKIN_POLL_SECS", "soon")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("PARLAY_IMAGE_QUALITY", "1.5")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("PARLAY_CHECKIN_POLL_SECS", "0")])).is_err());
    }
}
