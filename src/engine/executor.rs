//! Order submission.
//!
//! Defines the `Submitter` trait the decision lifecycle hands confirmed
//! orders to, with a dry-run implementation for validation and an HTTP
//! implementation for a bookmaker-style order endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{CoreError, Order, SubmissionReceipt};

/// Hands a confirmed order to the outside world.
///
/// Implementations distinguish failures worth retrying
/// (`SubmissionTransient`) from final refusals (`SubmissionRejected`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, order: &Order) -> Result<SubmissionReceipt, CoreError>;
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Logs the order and acknowledges it without placing anything.
#[derive(Debug, Default, Clone)]
pub struct DryRunSubmitter;

#[async_trait]
impl Submitter for DryRunSubmitter {
    async fn submit(&self, order: &Order) -> Result<SubmissionReceipt, CoreError> {
        info!(
            order_id = %order.order_id,
            selection = %order.selection_id,
            stake = format!("${}", order.stake),
            odds = format!("{:.2}", order.odds),
            "[DRY RUN] Would submit order"
        );
        Ok(SubmissionReceipt {
            order_id: order.order_id.clone(),
            reference: format!("dry-run-{}", uuid::Uuid::new_v4()),
            stake: order.stake,
            odds: order.odds,
            timestamp: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest<'a> {
    order_id: &'a str,
    selection_id: &'a str,
    stake: Decimal,
    odds: f64,
}

/// Acknowledgement body. Only `reference` is required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    reference: String,
    #[serde(default)]
    accepted_stake: Option<Decimal>,
    #[serde(default)]
    accepted_odds: Option<f64>,
}

/// POSTs orders as JSON to a configured endpoint.
pub struct HttpSubmitter {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSubmitter {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, CoreError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("PICKWISE/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(&self, order: &Order) -> Result<SubmissionReceipt, CoreError> {
        let body = OrderRequest {
            order_id: &order.order_id,
            selection_id: &order.selection_id,
            stake: order.stake,
            odds: order.odds,
        };

        debug!(endpoint = %self.endpoint, order_id = %order.order_id, "Submitting order");

        // The order id doubles as idempotency key, so a retried order is
        // never placed twice.
        let mut req = self
            .http
            .post(&self.endpoint)
            .header("Idempotency-Key", &order.order_id)
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CoreError::SubmissionTransient(format!("order request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err = classify_status(status, &text);
            warn!(order_id = %order.order_id, status = %status, error = %err, "Order not accepted");
            return Err(err);
        }

        let ack: OrderResponse = resp.json().await.map_err(|e| {
            CoreError::SubmissionRejected(format!("unreadable acknowledgement: {e}"))
        })?;

        Ok(SubmissionReceipt {
            order_id: order.order_id.clone(),
            reference: ack.reference,
            stake: ack.accepted_stake.unwrap_or(order.stake),
            odds: ack.accepted_odds.unwrap_or(order.odds),
            timestamp: Utc::now(),
        })
    }
}

/// 408, 429 and 5xx are worth retrying; any other failure is final.
pub fn classify_status(status: StatusCode, body: &str) -> CoreError {
    let detail = format!("{status}: {body}");
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        CoreError::SubmissionTransient(detail)
    } else {
        CoreError::SubmissionRejected(detail)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
