use std::{fs, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::warn;
use url::Url;

pub const CONFIG_FILE: &str = "netctl.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub api_prefix: String,
    pub user_id: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3500".into(),
            api_prefix: "/api/candidate".into(),
            user_id: None,
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    api_prefix: Option<String>,
    user_id: Option<String>,
    request_timeout_secs: Option<u64>,
}

impl Settings {
    /// Server url joined with the API prefix; every endpoint path hangs off
    /// this.
    pub fn base_url(&self) -> anyhow::Result<Url> {
        let server = Url::parse(self.server_url.trim())
            .with_context(|| format!("invalid server url '{}'", self.server_url))?;
        if !matches!(server.scheme(), "http" | "https") {
            bail!("server url '{}' must use http or https", self.server_url);
        }

        let prefix = self.api_prefix.trim().trim_matches('/');
        let joined = if prefix.is_empty() {
            format!("{}/", server.as_str().trim_end_matches('/'))
        } else {
            format!("{}/{prefix}/", server.as_str().trim_end_matches('/'))
        };
        Url::parse(&joined).with_context(|| format!("invalid api prefix '{}'", self.api_prefix))
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(Path::new(CONFIG_FILE)).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the config file, then the environment.
pub fn load_settings_from(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<FileSettings>(raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.server_url {
                    settings.server_url = v;
                }
                if let Some(v) = file_cfg.api_prefix {
                    settings.api_prefix = v;
                }
                if let Some(v) = file_cfg.user_id {
                    settings.user_id = Some(v);
                }
                if let Some(v) = file_cfg.request_timeout_secs {
                    settings.request_timeout_secs = Some(v);
                }
            }
            Err(err) => warn!(error = %err, "netctl: ignoring unreadable {CONFIG_FILE}"),
        }
    }

    if let Some(v) = env("NETWORK_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("NETWORK_API_PREFIX") {
        settings.api_prefix = v;
    }

    if let Some(v) = env("NETWORK_USER_ID") {
        settings.user_id = Some(v);
    }
    if let Some(v) = env("APP__USER_ID") {
        settings.user_id = Some(v);
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        match v.parse::<u64>() {
            Ok(0) => settings.request_timeout_secs = None,
            Ok(parsed) => settings.request_timeout_secs = Some(parsed),
            Err(_) => warn!(value = %v, "netctl: ignoring invalid APP__REQUEST_TIMEOUT_SECS"),
        }
    }

    settings
}
