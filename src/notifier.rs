// 🔔 Notifier - delivers "new filing extracted" alerts
//
// BarkNotifier pushes to a Bark device (https://api.day.app by default),
// either as a JSON POST or as a GET with the message in the path.
// Delivery counts only on HTTP 200; 5xx and 429 answers are retried.

use crate::config::NotifierConfig;
use crate::entities::{Filing, Transaction};
use crate::error::{NetworkError, NotificationError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

/// Longest title/subtitle/body accepted by the push service
const MAX_FIELD_LEN: usize = 500;

/// Transactions listed in a notification body before "... and N more"
const MAX_LISTED: usize = 5;

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub filing_id: String,
    pub member_name: String,
    pub office: Option<String>,
    pub document_url: String,
    pub flagged: bool,
    pub transactions: Vec<Transaction>,
}

impl NotificationEvent {
    pub fn for_filing(filing: &Filing, transactions: Vec<Transaction>) -> Self {
        NotificationEvent {
            filing_id: filing.filing_id.clone(),
            member_name: filing.member_name.clone(),
            office: filing.office.clone(),
            document_url: filing.document_url.clone(),
            flagged: filing.flagged,
            transactions,
        }
    }

    pub fn title(&self) -> String {
        format!("New PTR: {}", self.member_name)
    }

    pub fn subtitle(&self) -> String {
        let mut subtitle = match &self.office {
            Some(office) => format!("{} · {} transaction(s)", office, self.transactions.len()),
            None => format!("{} transaction(s)", self.transactions.len()),
        };
        if self.flagged {
            subtitle.push_str(" · some rows unreadable");
        }
        subtitle
    }

    pub fn body(&self) -> String {
        let mut lines: Vec<String> = self
            .transactions
            .iter()
            .take(MAX_LISTED)
            .map(Transaction::headline)
            .collect();
        if self.transactions.len() > MAX_LISTED {
            lines.push(format!("... and {} more", self.transactions.len() - MAX_LISTED));
        }
        if lines.is_empty() {
            lines.push(format!("Filing {}", self.filing_id));
        }
        lines.join("\n")
    }
}

/// Proof of a confirmed delivery
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub channel: String,
    pub delivered_at: DateTime<Utc>,
    pub status_code: Option<u16>,
}

/// Notification collaborator used by the pipeline
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<DeliveryReceipt, NotificationError>;
}

// ============================================================================
// BARK
// ============================================================================

#[derive(Serialize)]
struct BarkMessage<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle: Option<&'a str>,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
}

pub struct BarkNotifier {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    icon: Option<String>,
    use_post: bool,
    retry: RetryPolicy,
}

impl BarkNotifier {
    pub fn new(config: &NotifierConfig, retry: RetryPolicy) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(retry.timeout)
            .build()
            .map_err(|e| NetworkError::new("build_http_client", 0, e.to_string()))?;

        Ok(BarkNotifier {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            icon: config.icon.clone().filter(|icon| !icon.trim().is_empty()),
            use_post: config.use_post,
            retry,
        })
    }

    fn api_key(&self) -> Result<&str, NotificationError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| NotificationError::NotConfigured("BARK_API_KEY is not set".to_string()))
    }

    /// GET form: /{key}/{title}/{subtitle}/{body}?url=..&icon=..
    pub fn get_url(&self, title: &str, subtitle: Option<&str>, body: &str, url: &str) -> Result<String, NotificationError> {
        let key = self.api_key()?;
        let mut segments = vec![urlencoding::encode(key), urlencoding::encode(title)];
        if let Some(subtitle) = subtitle {
            segments.push(urlencoding::encode(subtitle));
        }
        segments.push(urlencoding::encode(body));

        let mut full = format!("{}/{}", self.base_url, segments.join("/"));
        let mut params = vec![format!("url={}", urlencoding::encode(url))];
        if let Some(icon) = &self.icon {
            params.push(format!("icon={}", urlencoding::encode(icon)));
        }
        full.push('?');
        full.push_str(&params.join("&"));
        Ok(full)
    }

    fn post_url(&self) -> Result<String, NotificationError> {
        Ok(format!("{}/{}", self.base_url, urlencoding::encode(self.api_key()?)))
    }
}

#[async_trait]
impl Notifier for BarkNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<DeliveryReceipt, NotificationError> {
        let title = sanitize(&event.title());
        let subtitle = sanitize(&event.subtitle());
        let body = sanitize(&event.body());
        let client = &self.client;

        let status = if self.use_post {
            let endpoint = self.post_url()?;
            let message = BarkMessage {
                title: &title,
                body: &body,
                subtitle: Some(&subtitle),
                url: &event.document_url,
                icon: self.icon.as_deref(),
            };
            let (endpoint, message) = (&endpoint, &message);
            self.retry
                .execute("notify_post", move || async move {
                    delivery_status(client.post(endpoint).json(message).send().await)
                })
                .await?
        } else {
            let endpoint = self.get_url(&title, Some(&subtitle), &body, &event.document_url)?;
            let endpoint = &endpoint;
            self.retry
                .execute("notify_get", move || async move {
                    delivery_status(client.get(endpoint).send().await)
                })
                .await?
        };

        if status != StatusCode::OK {
            return Err(NotificationError::Rejected(format!(
                "push service answered HTTP {}",
                status
            )));
        }

        info!(filing_id = %event.filing_id, "notification delivered");
        debug!(title = %title, "bark push accepted");
        Ok(DeliveryReceipt {
            channel: "bark".to_string(),
            delivered_at: Utc::now(),
            status_code: Some(status.as_u16()),
        })
    }
}

/// Server errors and throttling fail the attempt so the retry policy
/// tries again; any other answer ends the delivery.
fn delivery_status(response: reqwest::Result<reqwest::Response>) -> Result<StatusCode, String> {
    let status = response.map_err(|e| e.to_string())?.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(format!("push service answered HTTP {}", status));
    }
    Ok(status)
}

/// Normalize newlines and cap the length, marking truncation with "..."
pub fn sanitize(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if normalized.chars().count() <= MAX_FIELD_LEN {
        return normalized;
    }
    let mut truncated: String = normalized.chars().take(MAX_FIELD_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Chamber, ExtractionConfidence, OwnerCategory, TransactionType};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(api_key: Option<&str>) -> NotifierConfig {
        NotifierConfig {
            base_url: "https://api.day.app/".to_string(),
            api_key: api_key.map(str::to_string),
            icon: Some("https://example.test/icon.png".to_string()),
            use_post: false,
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        }
    }

    /// Local push endpoint answering each connection with the next scripted
    /// status (the last one repeats). Returns its base url and a hit counter.
    async fn create_push_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).or(statuses.last()).copied().unwrap_or(200);

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !is_complete(&request) {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }

                let response = format!(
                    "HTTP/1.1 {} Scripted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    /// Headers received and, for a POST, the whole body too
    fn is_complete(request: &[u8]) -> bool {
        let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= end + 4 + body_len
    }

    fn local_config(base_url: &str) -> NotifierConfig {
        NotifierConfig {
            base_url: base_url.to_string(),
            ..config(Some("device-key"))
        }
    }

    fn transaction(i: usize) -> Transaction {
        Transaction {
            filing_id: "20024512".to_string(),
            line_index: i,
            owner_category: OwnerCategory::Spouse,
            asset_description: "Apple Inc.".to_string(),
            ticker: Some("AAPL".to_string()),
            asset_type: Some("ST".to_string()),
            transaction_type: TransactionType::Buy,
            partial: false,
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            notification_date: None,
            amount_range: "$1,001 - $15,000".to_string(),
            amount_low: 1_001,
            amount_high: Some(15_000),
            extraction_confidence: ExtractionConfidence::Exact,
            owner_code: Some("SP".to_string()),
            raw_line: String::new(),
            extra: BTreeMap::new(),
        }
    }

    fn event(count: usize) -> NotificationEvent {
        let filing = Filing::discovered(
            "20024512",
            "Pelosi, Hon.. Nancy",
            Chamber::House,
            NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(),
            "https://disclosures-clerk.house.gov/public_disc/ptr-pdfs/2024/20024512.pdf",
        )
        .with_office("CA11");
        NotificationEvent::for_filing(&filing, (0..count).map(transaction).collect())
    }

    #[test]
    fn test_message_fields() {
        let event = event(7);
        assert_eq!(event.title(), "New PTR: Pelosi, Hon.. Nancy");
        assert_eq!(event.subtitle(), "CA11 · 7 transaction(s)");

        let body = event.body();
        assert_eq!(body.lines().count(), 6);
        assert!(body.starts_with("Buy AAPL $1,001 - $15,000 (Spouse, 01/15/2024)"));
        assert!(body.ends_with("... and 2 more"));
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(600);
        let sanitized = sanitize(&long);
        assert_eq!(sanitized.chars().count(), 500);
        assert!(sanitized.ends_with("..."));
        assert_eq!(sanitize("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_get_url_encodes_segments() {
        let notifier = BarkNotifier::new(&config(Some("key 1")), RetryPolicy::default()).unwrap();
        let url = notifier
            .get_url("New PTR", Some("CA11"), "Buy AAPL/MSFT", "https://x.test/a.pdf")
            .unwrap();
        assert_eq!(
            url,
            "https://api.day.app/key%201/New%20PTR/CA11/Buy%20AAPL%2FMSFT\
             ?url=https%3A%2F%2Fx.test%2Fa.pdf&icon=https%3A%2F%2Fexample.test%2Ficon.png"
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let notifier = BarkNotifier::new(&config(None), RetryPolicy::default()).unwrap();
        let result = notifier.notify(&event(1)).await;
        assert!(matches!(result, Err(NotificationError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_exhausted() {
        let (base_url, hits) = create_push_server(vec![503]).await;
        let notifier = BarkNotifier::new(&local_config(&base_url), quick_retry()).unwrap();

        let result = notifier.notify(&event(1)).await;
        match result {
            Err(NotificationError::Delivery(e)) => {
                assert_eq!(e.attempts, 3);
                assert!(e.message.contains("503"));
            }
            other => panic!("expected delivery failure, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_delivery_succeeds_after_server_error() {
        let (base_url, hits) = create_push_server(vec![502, 200]).await;
        let notifier = BarkNotifier::new(&local_config(&base_url), quick_retry()).unwrap();

        let receipt = notifier.notify(&event(2)).await.unwrap();
        assert_eq!(receipt.status_code, Some(200));
        assert_eq!(receipt.channel, "bark");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_rejected_without_retry() {
        let (base_url, hits) = create_push_server(vec![400]).await;
        let mut config = local_config(&base_url);
        config.use_post = true;
        let notifier = BarkNotifier::new(&config, quick_retry()).unwrap();

        let result = notifier.notify(&event(1)).await;
        assert!(matches!(result, Err(NotificationError::Rejected(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
