use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::context::DEFAULT_CONTEXT_WINDOW;
use crate::jurisdictions::DEFAULT_TTL;
use crate::settings::SettingsUpdate;
use crate::store::{FileStore, RedisStore, Storage};

/// Where local state is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Disabled,
    Memory,
    Directory(PathBuf),
    Redis(String),
}

impl StoreLocation {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "none" | "off" => StoreLocation::Disabled,
            "memory" => StoreLocation::Memory,
            url if url.starts_with("redis://") || url.starts_with("rediss://") => {
                StoreLocation::Redis(url.to_string())
            }
            path => StoreLocation::Directory(PathBuf::from(path)),
        }
    }

    fn default_location() -> Self {
        match dirs::config_dir() {
            Some(dir) => StoreLocation::Directory(dir.join("foia-coach")),
            None => StoreLocation::Memory,
        }
    }

    /// An unreachable Redis is only warned about: every store operation
    /// already degrades to a logged miss.
    pub async fn open(&self) -> Result<Storage> {
        Ok(match self {
            StoreLocation::Disabled => Storage::disabled(),
            StoreLocation::Memory => Storage::in_memory(),
            StoreLocation::Directory(path) => Storage::new(FileStore::new(path.clone())),
            StoreLocation::Redis(url) => {
                let store = RedisStore::new(url).context("invalid FOIA_COACH_STORE redis url")?;
                if let Err(e) = store.ping().await {
                    tracing::warn!(error = %e, "redis store unreachable; state will not persist");
                }
                Storage::new(store)
            }
        })
    }
}

pub struct AppConfig {
    pub store: StoreLocation,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub jurisdictions_ttl: Duration,
    pub context_window: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let store = env::var("FOIA_COACH_STORE")
            .map(|raw| StoreLocation::parse(&raw))
            .unwrap_or_else(|_| StoreLocation::default_location());

        let request_timeout = parse_duration("FOIA_COACH_TIMEOUT_SECONDS", 30)?;
        let jurisdictions_ttl =
            parse_duration("FOIA_COACH_JURISDICTIONS_TTL_SECONDS", DEFAULT_TTL.as_secs())?;

        let context_window: usize = env::var("FOIA_COACH_CONTEXT_WINDOW")
            .unwrap_or_else(|_| DEFAULT_CONTEXT_WINDOW.to_string())
            .parse()
            .context("FOIA_COACH_CONTEXT_WINDOW must be a non-negative integer")?;

        Ok(Self {
            store,
            api_url: non_empty_var("FOIA_COACH_API_URL"),
            api_token: non_empty_var("FOIA_COACH_API_TOKEN"),
            request_timeout,
            jurisdictions_ttl,
            context_window,
        })
    }

    /// Process-only overrides layered over the persisted settings.
    pub fn settings_override(&self) -> Option<SettingsUpdate> {
        if self.api_url.is_none() && self.api_token.is_none() {
            return None;
        }

        Some(SettingsUpdate {
            api_url: self.api_url.clone(),
            api_token: self.api_token.clone().map(Some),
            ..SettingsUpdate::default()
        })
    }

    /// A zero timeout leaves requests unbounded.
    pub fn request_timeout(&self) -> Option<Duration> {
        (!self.request_timeout.is_zero()).then_some(self.request_timeout)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_duration(env_key: &str, default_secs: u64) -> Result<Duration> {
    let raw = env::var(env_key).unwrap_or_else(|_| default_secs.to_string());
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{env_key} must be an integer number of seconds"))?;

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_locations() {
        assert_eq!(StoreLocation::parse("none"), StoreLocation::Disabled);
        assert_eq!(StoreLocation::parse("memory"), StoreLocation::Memory);
        assert_eq!(
            StoreLocation::parse("redis://127.0.0.1:6379"),
            StoreLocation::Redis("redis://127.0.0.1:6379".into())
        );
        assert_eq!(
            StoreLocation::parse("/var/lib/foia-coach"),
            StoreLocation::Directory(PathBuf::from("/var/lib/foia-coach"))
        );
    }

    #[tokio::test]
    async fn unreachable_redis_still_opens() {
        let location = StoreLocation::Redis("redis://127.0.0.1:1".into());
        let storage = location.open().await.unwrap();

        storage.save("blob", &1u32).await;
        assert_eq!(storage.load::<u32>("blob").await, None);
    }

    #[tokio::test]
    async fn local_locations_open() {
        let memory = StoreLocation::Memory.open().await.unwrap();
        memory.save("blob", &1u32).await;
        assert_eq!(memory.load::<u32>("blob").await, Some(1));

        let disabled = StoreLocation::Disabled.open().await.unwrap();
        disabled.save("blob", &1u32).await;
        assert_eq!(disabled.load::<u32>("blob").await, None);
    }

    #[test]
    fn override_only_when_something_is_set() {
        let mut config = AppConfig {
            store: StoreLocation::Memory,
            api_url: None,
            api_token: None,
            request_timeout: Duration::from_secs(30),
            jurisdictions_ttl: DEFAULT_TTL,
            context_window: DEFAULT_CONTEXT_WINDOW,
        };
        assert!(config.settings_override().is_none());

        config.api_token = Some("secret".into());
        let update = config.settings_override().unwrap();
        assert_eq!(update.api_token, Some(Some("secret".into())));
        assert_eq!(update.api_url, None);
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let config = AppConfig {
            store: StoreLocation::Disabled,
            api_url: None,
            api_token: None,
            request_timeout: Duration::ZERO,
            jurisdictions_ttl: DEFAULT_TTL,
            context_window: DEFAULT_CONTEXT_WINDOW,
        };
        assert_eq!(config.request_timeout(), None);
    }
}
