//! WhatsApp Business Cloud API transport.
//!
//! Uses the official WhatsApp Business Platform (Cloud API) for messaging.
//! Requires: Access Token + Phone Number ID from Meta Business Suite.
//! Incoming messages arrive via webhook (HTTP POST) — the gateway converts
//! them with [`parse_webhook`] and feeds the engine.

use async_trait::async_trait;
use cadence_core::config::WhatsAppConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::Messenger;
use cadence_core::types::DeliveryReceipt;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// WhatsApp Business messenger.
pub struct WhatsAppMessenger {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppMessenger {
    pub fn new(config: WhatsAppConfig) -> Result<Self> {
        if config.access_token.is_empty() {
            return Err(CadenceError::Config(
                "WhatsApp access_token not configured".into(),
            ));
        }
        if config.phone_number_id.is_empty() {
            return Err(CadenceError::Config(
                "WhatsApp phone_number_id not configured".into(),
            ));
        }
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    /// Verify the credentials by fetching the phone-number record.
    pub async fn connect(&self) -> Result<()> {
        let url = format!("{GRAPH_API_BASE}/{}", self.config.phone_number_id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.config.access_token))
            .send()
            .await
            .map_err(|e| CadenceError::Channel(format!("WhatsApp verification failed: {e}")))?;

        if response.status().is_success() {
            tracing::info!(
                "WhatsApp Business: connected (phone_id={})",
                self.config.phone_number_id
            );
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(CadenceError::Channel(format!(
                "WhatsApp token verification failed: {text}"
            )))
        }
    }
}

#[async_trait]
impl Messenger for WhatsAppMessenger {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, conversation_id: &str, body: &str) -> Result<DeliveryReceipt> {
        let url = format!("{GRAPH_API_BASE}/{}/messages", self.config.phone_number_id);

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": conversation_id,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": body
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.access_token))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| CadenceError::Channel(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CadenceError::Channel(format!(
                "WhatsApp API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CadenceError::Channel(format!("Invalid WhatsApp response: {e}")))?;

        let message_id = result["messages"][0]["id"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();

        tracing::debug!("WhatsApp message sent: {} → {}", message_id, conversation_id);
        Ok(DeliveryReceipt {
            message_id,
            accepted_at: Utc::now(),
        })
    }
}

/// An inbound human message extracted from a webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    /// WhatsApp id of the sender — the engine's conversation id.
    pub conversation_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Parse a WhatsApp Cloud API webhook payload into inbound text messages.
/// Status updates, media, and other entry kinds are ignored.
pub fn parse_webhook(payload: &serde_json::Value) -> Vec<InboundMessage> {
    let mut messages = Vec::new();
    let Some(entries) = payload["entry"].as_array() else {
        return messages;
    };
    for entry in entries {
        let Some(changes) = entry["changes"].as_array() else {
            continue;
        };
        for change in changes {
            let value = &change["value"];
            let Some(incoming) = value["messages"].as_array() else {
                continue;
            };
            for msg in incoming {
                if msg["type"].as_str() != Some("text") {
                    continue;
                }
                let Some(from) = msg["from"].as_str() else {
                    continue;
                };
                let timestamp = msg["timestamp"]
                    .as_str()
                    .and_then(|s| s.parse::<i64>().ok())
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .unwrap_or_else(Utc::now);
                messages.push(InboundMessage {
                    conversation_id: from.to_string(),
                    text: msg["text"]["body"].as_str().unwrap_or("").to_string(),
                    timestamp,
                });
            }
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_credentials() {
        assert!(WhatsAppMessenger::new(WhatsAppConfig::default()).is_err());

        let ok = WhatsAppMessenger::new(WhatsAppConfig {
            access_token: "tok".into(),
            phone_number_id: "123".into(),
            webhook_verify_token: String::new(),
        });
        assert!(ok.is_ok());
    }

    #[test]
    fn test_parse_webhook_text_message() {
        let payload = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "1001",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "messages": [{
                            "from": "5511999990000",
                            "id": "wamid.xyz",
                            "timestamp": "1767225600",
                            "type": "text",
                            "text": { "body": "quero saber mais" }
                        }]
                    }
                }]
            }]
        });

        let messages = parse_webhook(&payload);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].conversation_id, "5511999990000");
        assert_eq!(messages[0].text, "quero saber mais");
        assert_eq!(messages[0].timestamp.timestamp(), 1767225600);
    }

    #[test]
    fn test_parse_webhook_ignores_status_updates() {
        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "statuses": [{ "id": "wamid.abc", "status": "delivered" }]
                    }
                }]
            }]
        });
        assert!(parse_webhook(&payload).is_empty());
    }
}
