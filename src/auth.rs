//! OAuth2 authorization-code login against Strava.
//!
//! The browser does the consenting: we open the authorization URL, Strava
//! redirects back to a one-shot loopback listener with `?code=...`, and the
//! code is exchanged for a bearer token by the backend. The listener and the
//! browser sit behind the `AddressReader` and `Navigator` ports so the flow
//! can be driven in tests without either.

use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::info;

const AUTH_ENDPOINT: &str = "https://www.strava.com/oauth/authorize";
const SCOPES: &str = "activity:read_all,profile:read_all";

/// How long the user gets to finish the consent screen.
const REDIRECT_WAIT: Duration = Duration::from_secs(120);

/// Shown in the browser once the redirect has been captured.
const CLOSE_TAB_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Stravify</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 4rem;">
  <h1>Connected to Strava</h1>
  <p>You can close this tab and return to your terminal.</p>
</body></html>"#;

/// Reads and rewrites the address the OAuth provider redirected to.
pub trait AddressReader {
    /// The address most recently delivered to the application, if any.
    fn current(&self) -> Option<String>;
    /// Replace the visible address.
    fn rewrite(&mut self, address: String);
}

/// Triggers outbound navigation to an absolute URL.
pub trait Navigator {
    fn navigate(&self, url: &str) -> Result<()>;
}

/// Production navigator: the user's default browser.
pub struct SystemBrowser;

impl Navigator for SystemBrowser {
    fn navigate(&self, url: &str) -> Result<()> {
        opener::open(url).map_err(|e| anyhow!("failed to open the system browser: {e}"))
    }
}

/// The redirect address captured by the loopback listener.
pub struct CapturedAddress {
    address: Option<String>,
}

impl CapturedAddress {
    pub fn new(address: String) -> Self {
        Self {
            address: Some(address),
        }
    }
}

impl AddressReader for CapturedAddress {
    fn current(&self) -> Option<String> {
        self.address.clone()
    }

    fn rewrite(&mut self, address: String) {
        self.address = Some(address);
    }
}

/// Build the Strava authorization URL for this login attempt.
pub fn authorize_url(client_id: &str, redirect_uri: &str) -> String {
    format!(
        "{}?client_id={}&response_type=code&redirect_uri={}&approval_prompt=force&scope={}",
        AUTH_ENDPOINT,
        url_encode(client_id),
        url_encode(redirect_uri),
        url_encode(SCOPES),
    )
}

/// Pull the one-time authorization code out of the incoming address, then
/// strip the query so the code can never be read a second time.
pub fn detect_incoming_code(reader: &mut dyn AddressReader) -> Option<String> {
    let address = reader.current()?;
    if let Some(error) = extract_param(&address, "error") {
        tracing::warn!("authorization was refused: {error}");
        return None;
    }
    let code = extract_param(&address, "code")?;
    reader.rewrite(strip_query(&address));
    Some(code)
}

/// Run the outbound half of the login: bind the loopback listener, send the
/// browser to the consent screen, and wait for Strava's redirect. Returns
/// the address the redirect landed on.
pub async fn login(navigator: impl Navigator, client_id: &str) -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind the redirect listener")?;
    let port = listener
        .local_addr()
        .context("failed to read the redirect listener port")?
        .port();

    let redirect_uri = format!("http://127.0.0.1:{port}");
    let url = authorize_url(client_id, &redirect_uri);

    info!("opening browser for Strava authorization, redirect on {redirect_uri}");
    navigator.navigate(&url)?;

    wait_for_redirect(listener).await
}

/// Wait for the provider's redirect to hit the listener and answer it with
/// a static close-this-tab page. The request path carries the query string.
async fn wait_for_redirect(listener: TcpListener) -> Result<String> {
    let capture = tokio::time::timeout(REDIRECT_WAIT, async {
        let (mut stream, _addr) = listener
            .accept()
            .await
            .context("redirect listener accept failed")?;

        let mut buf = vec![0u8; 4096];
        let n = stream
            .read(&mut buf)
            .await
            .context("failed to read the redirect request")?;
        let request = String::from_utf8_lossy(&buf[..n]).to_string();

        // Request line: "GET /?code=XXXX&scope=... HTTP/1.1"
        let address = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/")
            .to_string();

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            CLOSE_TAB_HTML.len(),
            CLOSE_TAB_HTML
        );
        let _ = stream.write_all(response.as_bytes()).await;

        info!("captured authorization redirect");
        Ok(address)
    });

    capture
        .await
        .map_err(|_| anyhow!("timed out waiting for the Strava authorization redirect"))?
}

fn extract_param(address: &str, key: &str) -> Option<String> {
    let query = address.split('?').nth(1)?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn strip_query(address: &str) -> String {
    match address.find('?') {
        Some(idx) => address[..idx].to_string(),
        None => address.to_string(),
    }
}

fn url_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_carries_all_oauth_parameters() {
        let url = authorize_url("12345", "http://127.0.0.1:7777");

        assert!(url.starts_with("https://www.strava.com/oauth/authorize?"));
        assert!(url.contains("client_id=12345"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A7777"));
        assert!(url.contains("approval_prompt=force"));
        assert!(url.contains("scope=activity%3Aread_all%2Cprofile%3Aread_all"));
    }

    #[test]
    fn detect_extracts_code_and_strips_query() {
        let mut reader = CapturedAddress::new("/?code=abc123&scope=activity:read_all".to_string());

        assert_eq!(detect_incoming_code(&mut reader).as_deref(), Some("abc123"));
        assert_eq!(reader.current().as_deref(), Some("/"));
    }

    #[test]
    fn detect_is_one_shot() {
        let mut reader = CapturedAddress::new("/?code=abc123".to_string());

        assert!(detect_incoming_code(&mut reader).is_some());
        assert!(detect_incoming_code(&mut reader).is_none());
    }

    #[test]
    fn detect_returns_none_without_a_code() {
        let mut reader = CapturedAddress::new("/".to_string());
        assert!(detect_incoming_code(&mut reader).is_none());
    }

    #[test]
    fn provider_error_parameter_is_not_a_code() {
        let mut reader =
            CapturedAddress::new("/?error=access_denied&code=should_not_matter".to_string());
        assert!(detect_incoming_code(&mut reader).is_none());
    }

    #[test]
    fn url_encoded_code_values_are_decoded() {
        let mut reader = CapturedAddress::new("/?code=ab%2Fc%3D1".to_string());
        assert_eq!(detect_incoming_code(&mut reader).as_deref(), Some("ab/c=1"));
    }
}
