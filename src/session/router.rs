//! Event router: fans inbound-message and lifecycle events out to
//! auto-reply evaluation and webhook delivery.
//!
//! Every consumer runs in a spawned task so a slow webhook endpoint or rule
//! query never stalls the device's event pump.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::api::WebhookEventType;
use crate::client::{InboundMessage, WaClient};
use crate::store::{
    AutoReplyRule, AutoReplyRuleSource, MatchMode, MessageLog, ReplyScope, WebhookConfigSource,
};

/// Webhook envelope POSTed to the subscriber's URL.
#[derive(Debug, Serialize)]
pub struct WebhookEnvelope {
    pub event: WebhookEventType,
    pub device_id: String,
    pub timestamp: String,
    pub data: serde_json::Value,
}

/// Fans events out to auto-reply evaluation and webhook delivery.
///
/// Cheap to clone; all clones share the HTTP client.
#[derive(Clone)]
pub struct EventRouter {
    rules: Arc<dyn AutoReplyRuleSource>,
    webhooks: Arc<dyn WebhookConfigSource>,
    log: Arc<dyn MessageLog>,
    http: reqwest::Client,
}

impl EventRouter {
    pub fn new(
        rules: Arc<dyn AutoReplyRuleSource>,
        webhooks: Arc<dyn WebhookConfigSource>,
        log: Arc<dyn MessageLog>,
    ) -> Self {
        Self {
            rules,
            webhooks,
            log,
            http: reqwest::Client::new(),
        }
    }

    /// Route a lifecycle event (`qr`, `device`) to webhook delivery.
    ///
    /// Returns immediately; delivery happens in a spawned task.
    pub fn lifecycle(&self, device_id: &str, event: WebhookEventType, data: serde_json::Value) {
        let router = self.clone();
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            router.deliver_webhook(&device_id, event, data).await;
        });
    }

    /// Route an inbound message: auto-reply first, then webhook.
    ///
    /// Returns immediately; the pump is never blocked by rule evaluation or
    /// delivery.
    pub fn inbound(&self, device_id: &str, client: Arc<dyn WaClient>, message: InboundMessage) {
        let router = self.clone();
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            router.evaluate_auto_reply(&device_id, &client, &message).await;

            let data = json!({
                "id": message.id,
                "from": message.from,
                "to": message.to,
                "body": message.body,
                "timestamp": message.timestamp,
                "has_media": message.has_media,
                "type": message.kind,
                "pushname": message.push_name,
            });
            router
                .deliver_webhook(&device_id, WebhookEventType::Message, data)
                .await;
        });
    }

    /// Evaluate auto-reply rules; the first match fires, at most one reply
    /// per inbound message.
    async fn evaluate_auto_reply(
        &self,
        device_id: &str,
        client: &Arc<dyn WaClient>,
        message: &InboundMessage,
    ) {
        let rules = match self.rules.active_rules_for(device_id).await {
            Ok(rules) => rules,
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to load auto-reply rules");
                return;
            }
        };

        let body_lower = message.body.to_lowercase();
        let Some(rule) = rules
            .iter()
            .find(|r| rule_matches(r, &body_lower, message.is_group))
        else {
            return;
        };

        info!(
            device_id = %device_id,
            keywords = %rule.keywords,
            "Auto-reply triggered"
        );

        let response = rule.response.trim();
        if let Err(e) = client.send_message(&message.from, response).await {
            error!(device_id = %device_id, error = %e, "Failed to send auto-reply");
            return;
        }

        // Log the outbound reply so it counts in account statistics. Logging
        // failure never unwinds the already-delivered reply.
        let recipient = message.from.trim_end_matches("@c.us");
        if let Err(e) = self
            .log
            .append(&rule.user_id, device_id, recipient, response, "sent")
            .await
        {
            warn!(device_id = %device_id, error = %e, "Failed to log auto-reply");
        }
    }

    /// Deliver one webhook event, honoring the account's subscription.
    /// Fire-and-forget, at-most-once, no retry queue.
    async fn deliver_webhook(
        &self,
        device_id: &str,
        event: WebhookEventType,
        data: serde_json::Value,
    ) {
        let config = match self.webhooks.active_webhook_for(device_id).await {
            Ok(Some(config)) => config,
            Ok(None) => return,
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to load webhook config");
                return;
            }
        };

        if !config.events.contains(&event) {
            return;
        }

        let payload = WebhookEnvelope {
            event,
            device_id: device_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            data,
        };

        match self.http.post(&config.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(device_id = %device_id, event = %event, url = %config.url, "Webhook delivered");
            }
            Ok(response) => {
                warn!(
                    device_id = %device_id,
                    event = %event,
                    url = %config.url,
                    status = %response.status(),
                    "Webhook delivery rejected"
                );
            }
            Err(e) => {
                warn!(
                    device_id = %device_id,
                    event = %event,
                    url = %config.url,
                    error = %e,
                    "Webhook delivery failed"
                );
            }
        }
    }
}

/// Whether a rule matches a lower-cased message body in the given chat kind.
///
/// Keywords are comma-separated; each is trimmed and compared
/// case-insensitively. Scope filters group/private chats before matching.
pub fn rule_matches(rule: &AutoReplyRule, body_lower: &str, is_group: bool) -> bool {
    match rule.scope {
        ReplyScope::Group if !is_group => return false,
        ReplyScope::Private if is_group => return false,
        _ => {}
    }

    let keywords = rule
        .keywords
        .to_lowercase()
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>();

    match rule.match_mode {
        MatchMode::Exact => keywords.iter().any(|k| k == body_lower),
        MatchMode::Contains => keywords.iter().any(|k| body_lower.contains(k.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(keywords: &str, mode: MatchMode, scope: ReplyScope) -> AutoReplyRule {
        AutoReplyRule {
            user_id: "u1".to_string(),
            keywords: keywords.to_string(),
            match_mode: mode,
            response: "auto response".to_string(),
            scope,
        }
    }

    #[test]
    fn exact_matches_whole_body_only() {
        let r = rule("Hello, hi", MatchMode::Exact, ReplyScope::All);
        assert!(rule_matches(&r, "hello", false));
        assert!(rule_matches(&r, "hi", false));
        assert!(!rule_matches(&r, "hello there", false));
    }

    #[test]
    fn contains_matches_substring() {
        let r = rule("price, order", MatchMode::Contains, ReplyScope::All);
        assert!(rule_matches(&r, "what is the price?", false));
        assert!(rule_matches(&r, "my order arrived", false));
        assert!(!rule_matches(&r, "hello there", false));
    }

    #[test]
    fn keywords_are_trimmed_and_case_insensitive() {
        let r = rule("  INFO ,  Menu  ", MatchMode::Exact, ReplyScope::All);
        assert!(rule_matches(&r, "info", false));
        assert!(rule_matches(&r, "menu", false));
    }

    #[test]
    fn empty_keywords_never_match() {
        let r = rule(" , ,", MatchMode::Contains, ReplyScope::All);
        assert!(!rule_matches(&r, "anything", false));
    }

    #[test]
    fn group_scope_filters_private_chats() {
        let r = rule("hi", MatchMode::Exact, ReplyScope::Group);
        assert!(rule_matches(&r, "hi", true));
        assert!(!rule_matches(&r, "hi", false));
    }

    #[test]
    fn private_scope_filters_group_chats() {
        let r = rule("hi", MatchMode::Exact, ReplyScope::Private);
        assert!(rule_matches(&r, "hi", false));
        assert!(!rule_matches(&r, "hi", true));
    }
}
