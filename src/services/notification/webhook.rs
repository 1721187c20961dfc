use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::{Notification, Notifier};

pub const SIGNATURE_HEADER: &str = "X-Roombook-Signature";

/// Posts each notification as JSON to the mail/notification service.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(url: String, secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            secret,
        }
    }
}

/// Base64 HMAC-SHA1 of the request body. Empty when no secret is configured.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let body = serde_json::to_vec(notification).context("failed to encode notification")?;
        let signature = sign_payload(&self.secret, &body);

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if !signature.is_empty() {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        request
            .body(body)
            .send()
            .await
            .context("failed to send notification webhook")?
            .error_for_status()
            .context("notification webhook returned error")?;

        Ok(())
    }
}
