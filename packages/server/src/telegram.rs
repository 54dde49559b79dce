//! Telegram Bot API delivery channel.
//!
//! One message per listing; the subscriber id doubles as the chat id.
//! Rich templating stays out of this layer.

use async_trait::async_trait;
use anyhow::{Context, Result};
use serde_json::json;

use adscout::{ListingRecord, NotificationChannel, Subscriber};

pub struct TelegramChannel {
    client: reqwest::Client,
    token: String,
}

impl TelegramChannel {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
        }
    }

    fn send_url(&self) -> String {
        format!("https://api.telegram.org/bot{}/sendMessage", self.token)
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn message_text(record: &ListingRecord) -> String {
    format!(
        "<b>{}</b>\n\u{1F4B0} {} \u{20BD}\n<a href=\"{}\">{}</a>",
        escape_html(&record.title),
        record.price,
        record.external_url,
        record.external_url
    )
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn deliver(&self, subscriber: &Subscriber, records: &[ListingRecord]) -> Result<()> {
        for record in records {
            let response = self
                .client
                .post(self.send_url())
                .json(&json!({
                    "chat_id": subscriber.id.as_str(),
                    "text": message_text(record),
                    "parse_mode": "HTML",
                }))
                .send()
                .await
                .context("sending telegram message")?;
            response
                .error_for_status()
                .context("telegram rejected the message")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adscout::types::ListingId;
    use chrono::Utc;

    #[test]
    fn test_message_text_escapes_markup_in_titles() {
        let record = ListingRecord {
            id: ListingId::new(),
            source: "avito".into(),
            region: "spb".into(),
            external_url: "https://avito.example/1".into(),
            title: "BMW <3 & co".into(),
            price: 100_000,
            posted_at: Utc::now(),
            image_url: None,
            seller: None,
            attributes: serde_json::Value::Null,
        };

        let text = message_text(&record);
        assert!(text.contains("BMW &lt;3 &amp; co"));
        assert!(text.contains("https://avito.example/1"));
    }
}
