use std::time::Duration;
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Bounded so a dead backend cannot freeze the session forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ExchangeRequest {
    code: String,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    access_token: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest {
    message: String,
    strava_token: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    answer: String,
}

/// JSON client for the answer backend's two endpoints.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Trade a one-time authorization code for a bearer token. A 2xx body
    /// without an `access_token` field counts as failure.
    pub async fn exchange_code(&self, code: &str) -> Result<String> {
        let url = format!("{}/auth/exchange", self.base_url);

        let request = ExchangeRequest {
            code: code.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "code exchange failed with status: {}",
                response.status()
            ));
        }

        let exchange: ExchangeResponse = response.json().await?;
        exchange
            .access_token
            .ok_or_else(|| anyhow!("exchange response missing access_token"))
    }

    /// Ask a question about the activities behind `token`.
    pub async fn ask(&self, message: &str, token: &str) -> Result<String> {
        let url = format!("{}/chat", self.base_url);

        let request = ChatRequest {
            message: message.to_string(),
            strava_token: token.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "chat request failed with status: {}",
                response.status()
            ));
        }

        let chat: ChatResponse = response.json().await?;
        Ok(chat.answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_carries_message_and_token() {
        let request = ChatRequest {
            message: "How far did I run in 2025?".to_string(),
            strava_token: "tok1".to_string(),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["message"], "How far did I run in 2025?");
        assert_eq!(value["strava_token"], "tok1");
    }

    #[test]
    fn exchange_response_tolerates_extra_fields() {
        let exchange: ExchangeResponse = serde_json::from_str(
            r#"{"access_token":"tok1","token_type":"Bearer","athlete":{"id":7}}"#,
        )
        .unwrap();
        assert_eq!(exchange.access_token.as_deref(), Some("tok1"));
    }

    #[test]
    fn exchange_response_without_token_is_detectable() {
        let exchange: ExchangeResponse =
            serde_json::from_str(r#"{"token_type":"Bearer"}"#).unwrap();
        assert!(exchange.access_token.is_none());
    }

    #[test]
    fn chat_response_reads_only_the_answer() {
        let chat: ChatResponse =
            serde_json::from_str(r#"{"answer":"312 miles","model":"whatever"}"#).unwrap();
        assert_eq!(chat.answer, "312 miles");
    }
}
