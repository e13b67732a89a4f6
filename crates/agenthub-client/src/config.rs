pub const ENV_AGENTHUB_BASE_URL: &str = "AGENTHUB_BASE_URL";

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct HubClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl HubClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }

    /// Resolves the base URL from the environment, falling back to the given
    /// stored value. Environment always wins.
    #[must_use]
    pub fn from_env_or(stored_base_url: Option<&str>) -> Option<Self> {
        env_non_empty(ENV_AGENTHUB_BASE_URL)
            .or_else(|| stored_base_url.map(str::to_string))
            .map(Self::new)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn with_env<T>(key: &str, value: Option<&str>, test: impl FnOnce() -> T) -> T {
        let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = std::env::var(key).ok();
        if let Some(value) = value {
            unsafe { std::env::set_var(key, value) };
        } else {
            unsafe { std::env::remove_var(key) };
        }
        let result = test();
        if let Some(previous) = previous {
            unsafe { std::env::set_var(key, previous) };
        } else {
            unsafe { std::env::remove_var(key) };
        }
        result
    }

    #[test]
    fn env_base_url_wins_over_stored_value() {
        with_env(
            ENV_AGENTHUB_BASE_URL,
            Some("https://hub.staging.example.com/"),
            || {
                let config = HubClientConfig::from_env_or(Some("https://stored.example.com"))
                    .expect("config");
                assert_eq!(config.base_url, "https://hub.staging.example.com");
                assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
            },
        );
    }

    #[test]
    fn stored_base_url_used_when_env_unset() {
        with_env(ENV_AGENTHUB_BASE_URL, None, || {
            let config =
                HubClientConfig::from_env_or(Some("https://stored.example.com")).expect("config");
            assert_eq!(config.base_url, "https://stored.example.com");
        });
    }

    #[test]
    fn no_base_url_resolves_to_none() {
        with_env(ENV_AGENTHUB_BASE_URL, None, || {
            assert!(HubClientConfig::from_env_or(None).is_none());
        });
    }
}
