//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs to name what differs. The CLI
//! layers its own flags (and their environment variables) on top.

use eyre::Context;
use jiff::SignedDuration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// OAuth client id of the application.
    pub client_id: String,
    /// Installed-application clients still get a (non-confidential) secret from Google.
    pub client_secret: Option<String>,
    /// Where the signed-in user's OAuth token is persisted. `None` keeps it in memory only.
    pub token_file: Option<PathBuf>,
    /// Page listing the phone numbers for joining a meeting by phone, if there is one.
    pub dial_in_numbers_url: Option<String>,
    pub api_base_url: String,
    /// OpenID issuer whose discovery document names the OAuth endpoints.
    pub accounts_base_url: String,
    /// Per-request timeout for every call to Google.
    pub request_timeout: SignedDuration,
    pub calendar_window: CalendarWindow,
}

/// Default range of calendar entries to fetch, in whole days relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalendarWindow {
    pub start_days: Option<i32>,
    pub end_days: Option<i32>,
}

impl Default for CalendarWindow {
    fn default() -> Self {
        Self {
            start_days: Some(-1),
            end_days: Some(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            token_file: None,
            dial_in_numbers_url: None,
            api_base_url: "https://www.googleapis.com".to_string(),
            accounts_base_url: "https://accounts.google.com".to_string(),
            request_timeout: SignedDuration::from_secs(30),
            calendar_window: CalendarWindow::default(),
        }
    }
}

impl Config {
    /// Reads a JSON config file.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parse config file {}", path.display()))
    }

    pub(crate) fn request_timeout(&self) -> eyre::Result<std::time::Duration> {
        std::time::Duration::try_from(self.request_timeout)
            .map_err(|e| eyre::eyre!("request timeout must not be negative: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "client_id": "1234.apps.googleusercontent.com",
                "dial_in_numbers_url": "https://meet.example.com/phoneNumberList",
                "request_timeout": "PT5S",
                "calendar_window": {{ "end_days": 7 }}
            }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.client_id, "1234.apps.googleusercontent.com");
        assert_eq!(config.api_base_url, "https://www.googleapis.com");
        assert_eq!(config.request_timeout().unwrap(), std::time::Duration::from_secs(5));
        assert_eq!(
            config.calendar_window,
            CalendarWindow {
                start_days: Some(-1),
                end_days: Some(7),
            }
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "clientId": "camel-cased by mistake" }}"#).unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let config = Config {
            request_timeout: SignedDuration::from_secs(-1),
            ..Config::default()
        };
        assert!(config.request_timeout().is_err());
    }
}
