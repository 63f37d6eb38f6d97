//! Signaling client
//!
//! One blocking offer → answer exchange per connection attempt. The
//! client never retries; the coordinator decides what a failure means.

use std::io::Read;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use crate::config::SignalingConfig;
use crate::error::SignalingError;

/// Offer/answer exchange with the remote endpoint
pub trait Signaling: Send + Sync {
    /// Send the local session description, return the remote one
    fn exchange(&self, local_description: &str) -> Result<String, SignalingError>;
}

/// A completed exchange
#[derive(Debug, Clone)]
pub struct SignalingExchange {
    pub offer: String,
    pub answer: String,
    pub round_trip: Duration,
}

impl SignalingExchange {
    /// Run one exchange through `client`, timing it
    pub fn run(client: &dyn Signaling, offer: String) -> Result<Self, SignalingError> {
        let started = Instant::now();
        let answer = client.exchange(&offer)?;
        Ok(Self {
            offer,
            answer,
            round_trip: started.elapsed(),
        })
    }
}

/// Signaling over a single HTTP POST
pub struct HttpSignaling {
    client: Client,
    url: String,
    api_key: Option<String>,
    max_response_bytes: usize,
}

impl HttpSignaling {
    pub fn new(config: &SignalingConfig) -> Result<Self, SignalingError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            max_response_bytes: config.max_response_bytes,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn map_request_error(e: reqwest::Error) -> SignalingError {
    if e.is_timeout() {
        SignalingError::Timeout
    } else {
        SignalingError::Transport(e.to_string())
    }
}

impl Signaling for HttpSignaling {
    fn exchange(&self, local_description: &str) -> Result<String, SignalingError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/sdp")
            .body(local_description.to_owned());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(url = %self.url, offer_bytes = local_description.len(), "Sending offer");
        let response = request.send().map_err(map_request_error)?;

        let status = response.status();
        let mut body = Vec::new();
        response
            .take(self.max_response_bytes as u64 + 1)
            .read_to_end(&mut body)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    SignalingError::Timeout
                } else {
                    SignalingError::Transport(e.to_string())
                }
            })?;

        if !status.is_success() {
            body.truncate(self.max_response_bytes);
            return Err(SignalingError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        if body.len() > self.max_response_bytes {
            return Err(SignalingError::TooLarge(self.max_response_bytes));
        }

        let answer = String::from_utf8(body)
            .map_err(|_| SignalingError::Malformed("answer is not UTF-8".to_string()))?;
        validate_answer(&answer)?;

        tracing::debug!(answer_bytes = answer.len(), "Received answer");
        Ok(answer)
    }
}

/// Minimal shape check of an SDP answer
pub fn validate_answer(answer: &str) -> Result<(), SignalingError> {
    if answer.trim().is_empty() {
        return Err(SignalingError::Malformed("empty answer".to_string()));
    }
    if !answer.starts_with("v=0") {
        return Err(SignalingError::Malformed(
            "answer is not a session description".to_string(),
        ));
    }
    Ok(())
}
