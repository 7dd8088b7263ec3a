//! Configuration and credential files.
//!
//! [`Config`] is filled from command-line flags, then environment overrides.
//! The two JSON files it points at are only read when forwarding is enabled.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::{fmt, fs};

use crate::constants::{
    DEFAULT_NBP_NAME, DEFAULT_STANDARD_RESPONSE, DEFAULT_TWITTER_API_URL,
    DEFAULT_TWITTER_PARAMS_FILE, DEFAULT_TWITTER_TOKEN_FILE,
};

/// Runtime configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Display name to register, `Object:Type@Zone`.
    pub nbp_name: String,
    /// Text sent back (after `RESP`) to every request.
    pub standard_response: String,
    /// Forward request text to Twitter.
    pub enable_tweeting: bool,
    /// JSON file with the consumer key and secret.
    pub twitter_params: PathBuf,
    /// JSON file with the user's OAuth token and secret.
    pub twitter_token: PathBuf,
    /// Twitter API base URL.
    pub twitter_api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nbp_name: DEFAULT_NBP_NAME.to_string(),
            standard_response: DEFAULT_STANDARD_RESPONSE.to_string(),
            enable_tweeting: false,
            twitter_params: PathBuf::from(DEFAULT_TWITTER_PARAMS_FILE),
            twitter_token: PathBuf::from(DEFAULT_TWITTER_TOKEN_FILE),
            twitter_api_url: DEFAULT_TWITTER_API_URL.to_string(),
        }
    }
}

impl Config {
    /// Apply `ATALK_MEMO_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ATALK_MEMO_TWITTER_API_URL") {
            self.twitter_api_url = url.trim_end_matches('/').to_string();
        }
    }
}

/// Twitter application credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerParams {
    /// Consumer (API) key.
    pub consumer_key: String,
    /// Consumer (API) secret.
    pub consumer_secret: String,
}

impl ConsumerParams {
    /// Read the parameters file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or is not the expected JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot load Twitter parameters from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Cannot load Twitter parameters from {}", path.display()))
    }
}

impl fmt::Debug for ConsumerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerParams")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .finish()
    }
}

/// A user's OAuth 1.0a access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// Access token.
    #[serde(rename = "oauth_token")]
    pub token: String,
    /// Access token secret.
    #[serde(rename = "oauth_token_secret")]
    pub secret: String,
}

impl OAuthToken {
    /// Read a previously saved token.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or decoded.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot open Twitter token file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Cannot decode Twitter token file {}", path.display()))
    }

    /// Persist the token, readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Cannot write Twitter token file {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.nbp_name, "GophersInYourAppletalk:Twitter");
        assert_eq!(config.standard_response, "Gophers in your HyperCard!");
        assert!(!config.enable_tweeting);
        assert_eq!(config.twitter_params, PathBuf::from("twitter_params.json"));
        assert_eq!(config.twitter_token, PathBuf::from("twitter_token.json"));
    }

    #[test]
    fn test_consumer_params_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("params.json");
        fs::write(&path, r#"{"consumer_key": "ck", "consumer_secret": "cs"}"#).unwrap();

        let params = ConsumerParams::load(&path).unwrap();
        assert_eq!(params.consumer_key, "ck");
        assert_eq!(params.consumer_secret, "cs");
    }

    #[test]
    fn test_consumer_params_missing_or_malformed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("params.json");
        assert!(ConsumerParams::load(&path).is_err());

        fs::write(&path, r#"{"consumer_key": "ck"}"#).unwrap();
        assert!(ConsumerParams::load(&path).is_err());
    }

    #[test]
    fn test_token_save_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("token.json");
        let token = OAuthToken {
            token: "t".to_string(),
            secret: "s".to_string(),
        };
        token.save(&path).unwrap();

        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"oauth_token\""));
        assert!(json.contains("\"oauth_token_secret\""));
        assert_eq!(OAuthToken::load(&path).unwrap(), token);

        #[cfg(unix)]
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let token = OAuthToken {
            token: "visible".to_string(),
            secret: "hidden".to_string(),
        };
        let rendered = format!("{token:?}");
        assert!(rendered.contains("visible"));
        assert!(!rendered.contains("hidden"));
    }
}
