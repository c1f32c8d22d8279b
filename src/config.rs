//! Ambient configuration (spec §6): client/server/driver defaults and the
//! environment-variable precedence rules, kept as plain `Default` + builder
//! structs the way the teacher's `ProviderConfig` (`llm/provider.rs`) is built
//! and threaded through its provider constructors.

use std::time::Duration;

pub const POE_ACCESS_KEY_ENV: &str = "POE_ACCESS_KEY";
/// Deprecated: still read, but its use is logged via `log::warn!` at call sites.
pub const POE_API_KEY_ENV: &str = "POE_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://api.poe.com/bot/";

/// Configuration for [`crate::client::BotClient`] (spec §4.2).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub num_tries: u32,
    pub retry_sleep_time: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            num_tries: 2,
            retry_sleep_time: Duration::from_millis(500),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_num_tries(mut self, num_tries: u32) -> Self {
        self.num_tries = num_tries;
        self
    }

    pub fn with_retry_sleep_time(mut self, retry_sleep_time: Duration) -> Self {
        self.retry_sleep_time = retry_sleep_time;
        self
    }
}

/// One registered bot's server-side configuration (spec §4.4).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub path: String,
    pub access_key: Option<String>,
    pub allow_without_key: bool,
    pub should_insert_attachment_messages: bool,
    pub concat_attachments_to_message: bool,
}

impl ServerConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            access_key: None,
            allow_without_key: false,
            should_insert_attachment_messages: true,
            concat_attachments_to_message: false,
        }
    }

    pub fn with_access_key(mut self, access_key: impl Into<String>) -> Self {
        self.access_key = Some(access_key.into());
        self
    }

    pub fn with_allow_without_key(mut self, allow: bool) -> Self {
        self.allow_without_key = allow;
        self
    }

    /// Resolve the effective access key per spec §4.4's precedence: explicit
    /// per-bot key, then `POE_ACCESS_KEY`, then the deprecated explicit
    /// `api_key` param, then the deprecated `POE_API_KEY` env var.
    pub fn resolve_access_key(
        &self,
        deprecated_api_key: Option<&str>,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        if let Some(key) = &self.access_key {
            return Some(key.clone());
        }
        if let Some(key) = env(POE_ACCESS_KEY_ENV) {
            return Some(key);
        }
        if let Some(key) = deprecated_api_key {
            return Some(key.to_string());
        }
        if let Some(key) = env(POE_API_KEY_ENV) {
            log::warn!(
                "{} is deprecated; set {} instead",
                POE_API_KEY_ENV,
                POE_ACCESS_KEY_ENV
            );
            return Some(key);
        }
        None
    }
}

/// Options for [`crate::driver::StreamingResponseDriver`] (spec §4.5).
#[derive(Clone)]
pub struct DriverOptions {
    pub ping: Duration,
    pub sep: crate::sse::Separator,
    pub send_timeout: Option<Duration>,
    pub ping_message_factory: Option<std::sync::Arc<dyn Fn() -> crate::sse::ServerSentEvent + Send + Sync>>,
    pub headers: Vec<(String, String)>,
}

impl std::fmt::Debug for DriverOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverOptions")
            .field("ping", &self.ping)
            .field("sep", &self.sep)
            .field("send_timeout", &self.send_timeout)
            .field("ping_message_factory", &self.ping_message_factory.is_some())
            .field("headers", &self.headers)
            .finish()
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            ping: Duration::from_secs(15),
            sep: crate::sse::Separator::CrLf,
            send_timeout: None,
            ping_message_factory: None,
            headers: Vec::new(),
        }
    }
}

impl DriverOptions {
    pub fn with_ping(mut self, ping: Duration) -> Self {
        self.ping = ping;
        self
    }

    pub fn with_sep(mut self, sep: crate::sse::Separator) -> Self {
        self.sep = sep;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Mandatory response headers (spec §4.5), with any caller-supplied
    /// `headers` of the same name taking precedence over these defaults.
    pub fn response_headers(&self) -> Vec<(String, String)> {
        let mandatory = [
            ("Content-Type", "text/event-stream"),
            ("Cache-Control", "no-cache"),
            ("Connection", "keep-alive"),
            ("X-Accel-Buffering", "no"),
        ];

        let mut out: Vec<(String, String)> = mandatory
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        for (name, value) in &self.headers {
            if let Some(existing) = out.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                existing.1 = value.clone();
            } else {
                out.push((name.clone(), value.clone()));
            }
        }

        out
    }
}

/// Reads an environment variable, returning `None` when unset or empty.
pub fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.num_tries, 2);
        assert_eq!(cfg.retry_sleep_time, Duration::from_millis(500));
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn resolve_access_key_prefers_explicit_over_env() {
        let cfg = ServerConfig::new("/bot").with_access_key("explicit");
        let key = cfg.resolve_access_key(None, &|_| Some("fromenv".to_string()));
        assert_eq!(key.as_deref(), Some("explicit"));
    }

    #[test]
    fn resolve_access_key_falls_back_through_precedence() {
        let cfg = ServerConfig::new("/bot");
        let key = cfg.resolve_access_key(None, &|name| {
            if name == POE_ACCESS_KEY_ENV {
                None
            } else if name == POE_API_KEY_ENV {
                Some("deprecated-env".to_string())
            } else {
                None
            }
        });
        assert_eq!(key.as_deref(), Some("deprecated-env"));
    }

    #[test]
    fn driver_options_caller_header_overrides_mandatory_default() {
        let opts = DriverOptions::default().with_header("Cache-Control", "no-store");
        let headers = opts.response_headers();
        let cache_control = headers
            .iter()
            .find(|(k, _)| k == "Cache-Control")
            .unwrap();
        assert_eq!(cache_control.1, "no-store");
    }
}
