//! Twitter sink.
//!
//! Posts each forwarded payload as a tweet through the v2 API, signed with
//! OAuth 1.0a user credentials. When no usable token is on disk, [`TwitterSink::connect`]
//! runs the out-of-band (PIN) authorization flow and saves the result.

use std::borrow::Cow;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;

use super::oauth::{parse_form, OAuthRequest};
use super::Sink;
use crate::config::{Config, ConsumerParams, OAuthToken};
use crate::constants::HTTP_REQUEST_TIMEOUT;

/// Posts forwarded text as tweets.
#[derive(Debug, Clone)]
pub struct TwitterSink {
    client: reqwest::Client,
    api_url: String,
    consumer: ConsumerParams,
    token: OAuthToken,
}

impl TwitterSink {
    /// Sink with known credentials.
    pub fn new(api_url: impl Into<String>, consumer: ConsumerParams, token: OAuthToken) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_url: api_url.into(),
            consumer,
            token,
        })
    }

    /// Load credentials named by `config`, authorizing interactively if needed.
    ///
    /// # Errors
    ///
    /// Fails if the consumer parameters cannot be loaded, or if there is no
    /// usable token and authorization does not complete.
    pub async fn connect(config: &Config) -> Result<Self> {
        log::info!("Loading Twitter consumer key & secret");
        let consumer = ConsumerParams::load(&config.twitter_params)?;

        log::info!("Loading user OAuth token & secret");
        let client = http_client()?;
        let token = match OAuthToken::load(&config.twitter_token) {
            Ok(token) => token,
            Err(e) => {
                log::warn!("{e:#}");
                let token = authorize(&client, &config.twitter_api_url, &consumer)
                    .await
                    .context("Cannot obtain OAuth token")?;
                token.save(&config.twitter_token)?;
                token
            }
        };

        Ok(Self {
            client,
            api_url: config.twitter_api_url.clone(),
            consumer,
            token,
        })
    }

    /// Post one tweet.
    pub async fn post(&self, text: &str) -> Result<()> {
        let url = format!("{}/2/tweets", self.api_url);
        let authorization = OAuthRequest::new("POST", &url, &self.consumer)
            .token(&self.token)
            .authorization()?;

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, authorization)
            .json(&json!({ "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Twitter returned {}: {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for TwitterSink {
    async fn forward(&self, payload: &[u8]) -> Result<()> {
        let text = payload_text(payload);
        self.post(&text).await.context("posting tweet")
    }
}

/// Payload as text: UTF-8 when it is, Mac Roman otherwise.
pub fn payload_text(payload: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(payload) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => encoding_rs::MACINTOSH
            .decode_without_bom_handling(payload)
            .0,
    }
}

/// Run the PIN authorization flow against `api_url`.
///
/// Prints the authorize URL, then reads the PIN from stdin. Refuses to run
/// when stdin is not a terminal.
pub async fn authorize(client: &reqwest::Client, api_url: &str, consumer: &ConsumerParams) -> Result<OAuthToken> {
    if !atty::is(atty::Stream::Stdin) {
        bail!("No Twitter token and stdin is not a terminal; cannot ask for a PIN");
    }

    let temporary = request_token(client, api_url, consumer).await?;

    println!();
    println!("  To authorize posting, visit:");
    println!();
    println!("    {}", authorize_url(api_url, &temporary));
    println!();
    print!("  Then enter the PIN: ");
    io::stdout().flush()?;

    let pin = tokio::task::spawn_blocking(|| {
        let mut input = String::new();
        io::stdin().read_line(&mut input).map(|_| input)
    })
    .await?
    .context("Failed to read PIN")?;

    let pin = pin.trim();
    if pin.is_empty() {
        bail!("No PIN entered");
    }

    access_token(client, api_url, consumer, &temporary, pin).await
}

/// Page where the user approves `request_token`.
pub fn authorize_url(api_url: &str, request_token: &OAuthToken) -> String {
    format!("{}/oauth/authorize?oauth_token={}", api_url, request_token.token)
}

/// Obtain a temporary request token for the out-of-band flow.
pub async fn request_token(client: &reqwest::Client, api_url: &str, consumer: &ConsumerParams) -> Result<OAuthToken> {
    let url = format!("{}/oauth/request_token", api_url);
    let authorization = OAuthRequest::new("POST", &url, consumer)
        .protocol_param("oauth_callback", "oob")
        .authorization()?;

    let body = post_form(client, &url, authorization)
        .await
        .context("Failed to request OAuth token")?;
    token_from_form(&body)
}

/// Exchange an approved request token and its PIN for the user's token.
pub async fn access_token(
    client: &reqwest::Client,
    api_url: &str,
    consumer: &ConsumerParams,
    request_token: &OAuthToken,
    pin: &str,
) -> Result<OAuthToken> {
    let url = format!("{}/oauth/access_token", api_url);
    let authorization = OAuthRequest::new("POST", &url, consumer)
        .token(request_token)
        .protocol_param("oauth_verifier", pin)
        .authorization()?;

    let body = post_form(client, &url, authorization)
        .await
        .context("Failed to exchange PIN for OAuth token")?;
    token_from_form(&body)
}

async fn post_form(client: &reqwest::Client, url: &str, authorization: String) -> Result<String> {
    let response = client
        .post(url)
        .header(AUTHORIZATION, authorization)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        bail!("Twitter returned {}: {}", status, body);
    }
    Ok(body)
}

fn token_from_form(body: &str) -> Result<OAuthToken> {
    let mut token = None;
    let mut secret = None;
    for (key, value) in parse_form(body)? {
        match key.as_str() {
            "oauth_token" => token = Some(value),
            "oauth_token_secret" => secret = Some(value),
            _ => {}
        }
    }
    match (token, secret) {
        (Some(token), Some(secret)) => Ok(OAuthToken { token, secret }),
        _ => bail!("Token response is missing oauth_token or oauth_token_secret"),
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}
