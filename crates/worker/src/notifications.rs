//! Outbound notifications for inserted and republished properties.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use listing_core::{Error, PropertyNotification, PropertyRecord, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Receives enriched notifications. Failures are logged by the caller and
/// never affect ingestion.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &PropertyNotification) -> Result<()>;
}

/// Criteria a property must meet to be announced. Unset criteria match anything;
/// a set bound does not match a property missing that value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationFilter {
    #[serde(default)]
    pub min_price: Option<i64>,
    #[serde(default)]
    pub max_price: Option<i64>,
    #[serde(default)]
    pub min_living_area: Option<i32>,
    #[serde(default)]
    pub max_living_area: Option<i32>,
    #[serde(default)]
    pub min_rooms: Option<i32>,
    #[serde(default)]
    pub max_rooms: Option<i32>,
    /// Four-digit district codes
    #[serde(default)]
    pub districts: Vec<String>,
    #[serde(default)]
    pub energy_labels: Vec<String>,
}

fn within<T: PartialOrd + Copy>(value: Option<T>, min: Option<T>, max: Option<T>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(v) = value else {
        return false;
    };
    min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m)
}

impl NotificationFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, property: &PropertyRecord) -> bool {
        if !within(property.price, self.min_price, self.max_price)
            || !within(property.living_area, self.min_living_area, self.max_living_area)
            || !within(property.num_rooms, self.min_rooms, self.max_rooms)
        {
            return false;
        }

        if !self.districts.is_empty() {
            let Some(district) = property.district_code() else {
                return false;
            };
            if !self.districts.iter().any(|d| d.trim() == district) {
                return false;
            }
        }

        if !self.energy_labels.is_empty() {
            let Some(label) = property.energy_label.as_deref() else {
                return false;
            };
            if !self
                .energy_labels
                .iter()
                .any(|l| l.trim().eq_ignore_ascii_case(label))
            {
                return false;
            }
        }

        true
    }
}

/// Notification configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// POST target for JSON notifications; logging only when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    #[serde(default)]
    pub filter: NotificationFilter,
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &PropertyNotification) -> Result<()> {
        let p = &n.property;
        info!(
            kind = ?n.kind,
            identity_key = %p.identity_key,
            status = %p.status,
            city = p.city.as_deref().unwrap_or("-"),
            district = n.district_code.as_deref().unwrap_or("-"),
            price = p.price,
            living_area = p.living_area,
            price_per_sqm = n.price_per_sqm.map(|v| v.round() as i64),
            lat = p.latitude,
            lon = p.longitude,
            republish_count = p.republish_count,
            "Property notification"
        );
        Ok(())
    }
}

/// POSTs notifications as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url)
            .map_err(|e| Error::notification(format!("invalid webhook url {}: {}", url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::notification(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, n: &PropertyNotification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(n)
            .send()
            .await
            .map_err(|e| Error::notification(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::notification(format!("webhook returned {}", status)));
        }
        debug!(identity_key = %n.property.identity_key, "Webhook delivered");
        Ok(())
    }
}

/// Applies the filter, then fans out to every channel.
pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    filter: NotificationFilter,
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDispatcher {
    /// Log channel only, no filter.
    pub fn new() -> Self {
        Self {
            channels: vec![Arc::new(LogNotifier)],
            filter: NotificationFilter::default(),
        }
    }

    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        let mut dispatcher = Self::new().with_filter(config.filter.clone());
        if let Some(url) = &config.webhook_url {
            let webhook =
                WebhookNotifier::new(url, Duration::from_secs(config.webhook_timeout_secs))?;
            dispatcher = dispatcher.with_channel(Arc::new(webhook));
        }
        Ok(dispatcher)
    }

    pub fn with_channel(mut self, channel: Arc<dyn Notifier>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_filter(mut self, filter: NotificationFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    /// Every channel is tried; the first failure is returned.
    async fn notify(&self, n: &PropertyNotification) -> Result<()> {
        if !self.filter.matches(&n.property) {
            debug!(identity_key = %n.property.identity_key, "Notification filtered out");
            return Ok(());
        }

        let mut first_error = None;
        for channel in &self.channels {
            if let Err(e) = channel.notify(n).await {
                warn!(identity_key = %n.property.identity_key, error = %e, "Notification channel failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
