//! Payment gateway seam and its Stripe REST implementation.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::Secret;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payments are not configured")]
    NotConfigured,

    #[error("Payment transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Card {
        message: String,
        code: Option<String>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("Payment API error ({status}): {message}")]
    Api { status: u16, message: String },
}

// ---------------------------------------------------------------------------
// Wire types (the subset of Stripe objects the portal reads)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceSettings {
    #[serde(default)]
    pub default_payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub invoice_settings: InvoiceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recurring {
    pub interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub recurring: Option<Recurring>,
    #[serde(default)]
    pub product: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct List<T> {
    pub data: Vec<T>,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub items: List<SubscriptionItem>,
    /// Id, or the expanded object when requested.
    #[serde(default)]
    pub default_payment_method: Option<Value>,
    #[serde(default)]
    pub latest_invoice: Option<Value>,
}

impl Subscription {
    pub fn price(&self) -> Option<&Price> {
        self.items.data.first().map(|item| &item.price)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }

    /// Status and client secret of the first invoice's payment intent, when
    /// `latest_invoice.payment_intent` was expanded.
    pub fn payment_intent(&self) -> Option<(&str, Option<&str>)> {
        let intent = self.latest_invoice.as_ref()?.get("payment_intent")?;
        let status = intent.get("status")?.as_str()?;
        Some((status, intent.get("client_secret").and_then(Value::as_str)))
    }

    pub fn default_payment_method_id(&self) -> Option<&str> {
        match self.default_payment_method.as_ref()? {
            Value::String(id) => Some(id.as_str()),
            obj => obj.get("id").and_then(Value::as_str),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub brand: String,
    pub last4: String,
    pub exp_month: u32,
    pub exp_year: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub card: Option<Card>,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, PaymentError>;
    async fn create_customer(&self, email: &str, name: Option<&str>) -> Result<Customer, PaymentError>;
    async fn get_customer(&self, id: &str) -> Result<Customer, PaymentError>;
    async fn attach_payment_method(&self, payment_method: &str, customer: &str) -> Result<(), PaymentError>;
    async fn set_default_payment_method(&self, customer: &str, payment_method: &str) -> Result<(), PaymentError>;
    /// Create a subscription with `latest_invoice.payment_intent` expanded.
    async fn create_subscription(
        &self,
        customer: &str,
        price: &str,
        payment_method: &str,
        user_email: &str,
    ) -> Result<Subscription, PaymentError>;
    async fn get_subscription(&self, id: &str) -> Result<Subscription, PaymentError>;
    /// `status` is a Stripe status filter such as `all` or `active`.
    async fn list_subscriptions(&self, customer: &str, status: &str) -> Result<Vec<Subscription>, PaymentError>;
    async fn cancel_subscription(&self, id: &str) -> Result<Subscription, PaymentError>;
    async fn cancel_at_period_end(&self, id: &str) -> Result<Subscription, PaymentError>;
    async fn set_subscription_payment_method(
        &self,
        id: &str,
        payment_method: &str,
    ) -> Result<Subscription, PaymentError>;
    async fn get_payment_method(&self, id: &str) -> Result<PaymentMethod, PaymentError>;
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: StripeApiError,
}

#[derive(Debug, Default, Deserialize)]
struct StripeApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: Secret,
}

impl StripeClient {
    pub fn new(client: reqwest::Client, api_base: String, secret_key: Secret) -> Self {
        Self {
            client,
            api_base,
            secret_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.api_base)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, PaymentError> {
        let response = request.bearer_auth(self.secret_key.expose()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let envelope: ErrorEnvelope = response.json().await.unwrap_or_default();
        let err = envelope.error;
        let message = err
            .message
            .unwrap_or_else(|| format!("Request failed with status {status}"));
        tracing::debug!(status = status.as_u16(), kind = %err.kind, code = ?err.code, "stripe error");

        Err(if err.kind == "card_error" {
            PaymentError::Card {
                message,
                code: err.code,
            }
        } else if err.code.as_deref() == Some("resource_missing") || status == reqwest::StatusCode::NOT_FOUND {
            PaymentError::NotFound(message)
        } else {
            PaymentError::Api {
                status: status.as_u16(),
                message,
            }
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, PaymentError> {
        let list: List<Customer> = self
            .send(self.client.get(self.url("customers")).query(&[("email", email), ("limit", "1")]))
            .await?;
        Ok(list.data.into_iter().next())
    }

    async fn create_customer(&self, email: &str, name: Option<&str>) -> Result<Customer, PaymentError> {
        let mut form = vec![("email", email)];
        if let Some(name) = name {
            form.push(("name", name));
        }
        self.send(self.client.post(self.url("customers")).form(&form)).await
    }

    async fn get_customer(&self, id: &str) -> Result<Customer, PaymentError> {
        self.send(self.client.get(self.url(&format!("customers/{id}")))).await
    }

    async fn attach_payment_method(&self, payment_method: &str, customer: &str) -> Result<(), PaymentError> {
        let _: PaymentMethod = self
            .send(
                self.client
                    .post(self.url(&format!("payment_methods/{payment_method}/attach")))
                    .form(&[("customer", customer)]),
            )
            .await?;
        Ok(())
    }

    async fn set_default_payment_method(&self, customer: &str, payment_method: &str) -> Result<(), PaymentError> {
        let _: Customer = self
            .send(
                self.client
                    .post(self.url(&format!("customers/{customer}")))
                    .form(&[("invoice_settings[default_payment_method]", payment_method)]),
            )
            .await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        customer: &str,
        price: &str,
        payment_method: &str,
        user_email: &str,
    ) -> Result<Subscription, PaymentError> {
        self.send(self.client.post(self.url("subscriptions")).form(&[
            ("customer", customer),
            ("items[0][price]", price),
            ("default_payment_method", payment_method),
            ("expand[]", "latest_invoice.payment_intent"),
            ("metadata[userEmail]", user_email),
        ]))
        .await
    }

    async fn get_subscription(&self, id: &str) -> Result<Subscription, PaymentError> {
        self.send(self.client.get(self.url(&format!("subscriptions/{id}")))).await
    }

    async fn list_subscriptions(&self, customer: &str, status: &str) -> Result<Vec<Subscription>, PaymentError> {
        let list: List<Subscription> = self
            .send(self.client.get(self.url("subscriptions")).query(&[
                ("customer", customer),
                ("status", status),
                ("limit", "10"),
                ("expand[]", "data.default_payment_method"),
            ]))
            .await?;
        Ok(list.data)
    }

    async fn cancel_subscription(&self, id: &str) -> Result<Subscription, PaymentError> {
        self.send(self.client.delete(self.url(&format!("subscriptions/{id}")))).await
    }

    async fn cancel_at_period_end(&self, id: &str) -> Result<Subscription, PaymentError> {
        self.send(
            self.client
                .post(self.url(&format!("subscriptions/{id}")))
                .form(&[("cancel_at_period_end", "true")]),
        )
        .await
    }

    async fn set_subscription_payment_method(
        &self,
        id: &str,
        payment_method: &str,
    ) -> Result<Subscription, PaymentError> {
        self.send(
            self.client
                .post(self.url(&format!("subscriptions/{id}")))
                .form(&[("default_payment_method", payment_method)]),
        )
        .await
    }

    async fn get_payment_method(&self, id: &str) -> Result<PaymentMethod, PaymentError> {
        self.send(self.client.get(self.url(&format!("payment_methods/{id}")))).await
    }
}

/// Used when no Stripe key is configured: every call fails.
pub struct DisabledPayments;

#[async_trait]
impl PaymentGateway for DisabledPayments {
    async fn find_customer_by_email(&self, _: &str) -> Result<Option<Customer>, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn create_customer(&self, _: &str, _: Option<&str>) -> Result<Customer, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn get_customer(&self, _: &str) -> Result<Customer, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn attach_payment_method(&self, _: &str, _: &str) -> Result<(), PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn set_default_payment_method(&self, _: &str, _: &str) -> Result<(), PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn create_subscription(&self, _: &str, _: &str, _: &str, _: &str) -> Result<Subscription, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn get_subscription(&self, _: &str) -> Result<Subscription, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn list_subscriptions(&self, _: &str, _: &str) -> Result<Vec<Subscription>, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn cancel_subscription(&self, _: &str) -> Result<Subscription, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn cancel_at_period_end(&self, _: &str) -> Result<Subscription, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn set_subscription_payment_method(&self, _: &str, _: &str) -> Result<Subscription, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
    async fn get_payment_method(&self, _: &str) -> Result<PaymentMethod, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
}
