//! Hosted checkout sessions for paid plans
//!
//! The session carries the organization and plan in `metadata` and
//! `client_reference_id`; the `checkout.session.completed` webhook reads
//! them back to activate the plan.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::StripeConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Payment provider is not configured")]
    NotConfigured,

    #[error("Request to payment provider failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Payment provider returned {status}: {message}")]
    Provider { status: u16, message: String },
}

/// What the customer is about to pay for
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub price_cents: i64,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    /// Form fields of a monthly subscription session
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("mode", "subscription".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][price_data][currency]", "usd".to_string()),
            ("line_items[0][price_data][unit_amount]", self.price_cents.to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                format!("{} Plan", self.plan_name),
            ),
            (
                "line_items[0][price_data][product_data][description]",
                format!("Monthly subscription for {} Plan", self.plan_name),
            ),
            ("line_items[0][price_data][recurring][interval]", "month".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", self.success_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
            ("client_reference_id", self.organization_id.to_string()),
            ("metadata[plan_id]", self.plan_id.to_string()),
            ("metadata[organization_id]", self.organization_id.to_string()),
        ]
    }
}

/// Created session, handed to the browser for redirect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSessionRef {
    pub id: String,

    #[serde(default)]
    pub url: Option<String>,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_session(&self, request: &CheckoutRequest)
        -> Result<CheckoutSessionRef, CheckoutError>;
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Stripe Checkout over the REST API
#[derive(Clone)]
pub struct StripeCheckout {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl StripeCheckout {
    pub fn new(config: &StripeConfig) -> Result<Self, CheckoutError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CheckoutProvider for StripeCheckout {
    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSessionRef, CheckoutError> {
        if self.secret_key.is_empty() {
            return Err(CheckoutError::NotConfigured);
        }

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&request.form_fields())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ProviderErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            tracing::error!(
                status = %status,
                organization_id = %request.organization_id,
                "Checkout session creation failed"
            );
            return Err(CheckoutError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let session: CheckoutSessionRef = response.json().await?;
        tracing::info!(
            session_id = %session.id,
            organization_id = %request.organization_id,
            plan = %request.plan_name,
            "Checkout session created"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            organization_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            plan_name: "Professional".to_string(),
            price_cents: 1500,
            success_url: "https://helpdesk.example/ok".to_string(),
            cancel_url: "https://helpdesk.example/cancel".to_string(),
        }
    }

    fn field<'a>(fields: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_form_fields_describe_monthly_plan() {
        let req = request();
        let fields = req.form_fields();

        assert_eq!(field(&fields, "mode"), Some("subscription"));
        assert_eq!(field(&fields, "line_items[0][price_data][unit_amount]"), Some("1500"));
        assert_eq!(
            field(&fields, "line_items[0][price_data][product_data][name]"),
            Some("Professional Plan")
        );
        assert_eq!(
            field(&fields, "line_items[0][price_data][recurring][interval]"),
            Some("month")
        );
        let org = req.organization_id.to_string();
        assert_eq!(field(&fields, "client_reference_id"), Some(org.as_str()));
        assert_eq!(field(&fields, "metadata[organization_id]"), Some(org.as_str()));
    }

    #[test]
    fn test_session_ref_parses_without_url() {
        let session: CheckoutSessionRef = serde_json::from_str(r#"{"id":"cs_test_1"}"#).unwrap();
        assert_eq!(session.id, "cs_test_1");
        assert!(session.url.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_refuses() {
        let checkout = StripeCheckout::new(&StripeConfig {
            secret_key: String::new(),
            webhook_secret: String::new(),
            public_key: String::new(),
            api_base: "http://127.0.0.1:9".to_string(),
        })
        .unwrap();

        let err = checkout.create_session(&request()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotConfigured));
    }
}
