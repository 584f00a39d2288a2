use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};

const DEFAULT_BOOKING_SERVICE_URL: &str = "http://127.0.0.1:4000";

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub enabled: bool,
    pub service_url: String,
    pub request_timeout_secs: u64,
}

impl BookingConfig {
    pub fn from_env() -> Option<Self> {
        let enabled = std::env::var("BOOKING_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        if !enabled {
            return None;
        }

        let service_url = std::env::var("BOOKING_SERVICE_URL")
            .unwrap_or_else(|_| DEFAULT_BOOKING_SERVICE_URL.to_string());
        let request_timeout_secs = std::env::var("BOOKING_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        Some(Self {
            enabled,
            service_url,
            request_timeout_secs,
        })
    }
}

/// Response from the booking service's meeting-link lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingLookupResponse {
    #[serde(rename = "roomId")]
    pub room_id: String,
}

/// Response from the identity service's profile lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Boundary client for the booking and identity services. Lookups degrade
/// to local fallbacks when the service is disabled or unreachable, so a
/// booking outage never blocks a call.
pub struct BookingClient {
    config: Option<BookingConfig>,
    client: reqwest::Client,
}

impl BookingClient {
    pub fn new(config: Option<BookingConfig>) -> Result<Self> {
        let timeout_secs = config
            .as_ref()
            .map(|c| c.request_timeout_secs)
            .unwrap_or(10);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                SignalError::Internal(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(BookingConfig::from_env())
    }

    /// Resolves a meeting-link token to a room id. Falls back to deriving
    /// the room id from the token itself when the booking service is
    /// disabled or the lookup fails.
    pub async fn room_for_token(&self, token: &str) -> String {
        let Some(config) = &self.config else {
            return derive_room_id(token);
        };

        match self.lookup_meeting(config, token).await {
            Ok(room_id) => room_id,
            Err(e) => {
                tracing::warn!(error = %e, "Booking lookup failed, deriving room id locally");
                derive_room_id(token)
            }
        }
    }

    /// Fetches the display name for a user id. Returns `None` when the
    /// identity layer is disabled or the lookup fails; callers fall back
    /// to a locally-entered name.
    pub async fn display_name(&self, user_id: &str) -> Option<String> {
        let config = self.config.as_ref()?;

        let url = format!("{}/api/profiles/{}", config.service_url, user_id);
        let result: Result<ProfileResponse> = async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| SignalError::BookingService(e.to_string()))?;

            if !response.status().is_success() {
                return Err(SignalError::BookingService(format!(
                    "Profile lookup returned {}",
                    response.status()
                )));
            }

            response
                .json()
                .await
                .map_err(|e| SignalError::BookingService(e.to_string()))
        }
        .await;

        match result {
            Ok(profile) => Some(profile.display_name),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Profile lookup failed");
                None
            }
        }
    }

    /// Reports a finished session (duration and an optional rating) back to
    /// the booking service. Fire-and-forget: failures are logged, never
    /// surfaced to the caller.
    pub async fn report_session_complete(
        &self,
        token: &str,
        duration_secs: u64,
        rating: Option<u8>,
    ) {
        let Some(config) = &self.config else {
            return;
        };

        let url = format!("{}/api/meetings/{}/complete", config.service_url, token);
        let body = serde_json::json!({
            "durationSecs": duration_secs,
            "rating": rating,
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(
                    token = %token,
                    status = %response.status(),
                    "Session-completion report rejected"
                );
            }
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "Session-completion report failed");
            }
        }
    }

    async fn lookup_meeting(&self, config: &BookingConfig, token: &str) -> Result<String> {
        let url = format!("{}/api/meetings/{}", config.service_url, token);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SignalError::BookingService(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SignalError::BookingService(format!(
                "Meeting lookup returned {}",
                response.status()
            )));
        }

        let lookup: MeetingLookupResponse = response
            .json()
            .await
            .map_err(|e| SignalError::BookingService(e.to_string()))?;

        Ok(lookup.room_id)
    }
}

/// Derives a stable room id from a meeting-link token. Both participants
/// follow the same link, so deriving locally still lands them in the same
/// room.
pub fn derive_room_id(token: &str) -> String {
    let cleaned: String = token
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();

    if cleaned.is_empty() {
        "lobby".to_string()
    } else {
        format!("room-{}", cleaned.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_room_id_is_stable() {
        assert_eq!(derive_room_id("Abc-123"), derive_room_id("Abc-123"));
        assert_eq!(derive_room_id("Abc-123"), "room-abc-123");
    }

    #[test]
    fn test_derive_room_id_strips_punctuation() {
        assert_eq!(derive_room_id("  tok/en?x=1  "), "room-tokenx1");
    }

    #[test]
    fn test_derive_room_id_empty_token_falls_back() {
        assert_eq!(derive_room_id(""), "lobby");
        assert_eq!(derive_room_id("///"), "lobby");
    }

    #[tokio::test]
    async fn test_disabled_client_derives_locally() {
        let client = BookingClient::new(None).unwrap();
        assert_eq!(client.room_for_token("Abc-123").await, "room-abc-123");
        assert_eq!(client.display_name("user-1").await, None);
    }

    #[tokio::test]
    async fn test_disabled_completion_report_is_noop() {
        let client = BookingClient::new(None).unwrap();
        // Nothing to assert beyond not panicking and not blocking.
        client.report_session_complete("Abc-123", 1800, Some(5)).await;
    }

    #[tokio::test]
    async fn test_unreachable_service_falls_back() {
        let client = BookingClient::new(Some(BookingConfig {
            enabled: true,
            service_url: "http://127.0.0.1:1".to_string(),
            request_timeout_secs: 1,
        }))
        .unwrap();
        assert_eq!(client.room_for_token("Abc-123").await, "room-abc-123");
    }
}
