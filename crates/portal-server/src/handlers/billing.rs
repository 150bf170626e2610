//! Stripe-backed billing routes and the webhook receiver.
//!
//! Stripe is the source of truth.  After each successful gateway call the
//! local mirror is patched on a best-effort basis: a failed mirror write is
//! logged and the caller still gets the gateway's answer.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use portal_store::{MirrorPatch, SubscriptionEvent, SubscriptionRecord};

use crate::api::AppState;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::handlers::{required, required_email, ApiJson};
use crate::mirror::{self, from_unix, snapshot_of};
use crate::payments::{Customer, PaymentMethod, Subscription};
use crate::webhook::StripeEvent;

/// Fetch a customer and check the caller may act on it.
async fn owned_customer(
    state: &AppState,
    principal: &Principal,
    customer_id: &str,
) -> Result<Customer, ApiError> {
    let customer = state.payments.get_customer(customer_id).await?;
    let owner = customer
        .email
        .as_deref()
        .map(|e| e.trim().to_ascii_lowercase());
    if principal.is_admin() || owner.as_deref() == Some(principal.email.as_str()) {
        Ok(customer)
    } else {
        Err(ApiError::Forbidden(
            "Customer does not belong to the caller".to_string(),
        ))
    }
}

fn customer_email(customer: &Customer, principal: &Principal) -> String {
    customer
        .email
        .as_deref()
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_else(|| principal.email.clone())
}

/// Apply a mirror patch and optionally log an event on the subscription
/// record.  Errors are logged, never returned.
async fn write_mirror(
    state: &AppState,
    email: &str,
    patch: &MirrorPatch,
    record: Option<(SubscriptionRecord, SubscriptionEvent)>,
) {
    let now = Utc::now();
    let mut db = state.db.lock().await;
    match db.patch_subscription_mirror(email, patch, now) {
        Ok(true) => {}
        Ok(false) => warn!(email, "no local user to mirror subscription onto"),
        Err(e) => warn!(email, error = %e, "subscription mirror patch failed"),
    }
    if let Some((snapshot, event)) = record {
        if let Err(e) = db.record_local_subscription_change(&snapshot, &event) {
            warn!(subscription = %snapshot.id, error = %e, "subscription event log failed");
        }
    }
}

fn local_event(kind: &str, status: &str) -> SubscriptionEvent {
    SubscriptionEvent {
        event_id: None,
        kind: kind.to_string(),
        timestamp: Utc::now(),
        status: Some(status.to_string()),
        data: Value::Null,
    }
}

fn payment_method_summary(pm: &PaymentMethod) -> Value {
    json!({
        "id": pm.id,
        "type": pm.kind,
        "card": pm.card.as_ref().map(|c| json!({
            "brand": c.brand,
            "last4": c.last4,
            "exp_month": c.exp_month,
            "exp_year": c.exp_year,
        })),
    })
}

fn subscription_summary(sub: &Subscription) -> Value {
    json!({
        "id": sub.id,
        "status": sub.status,
        "cancel_at_period_end": sub.cancel_at_period_end,
        "current_period_start": sub.current_period_start.and_then(from_unix),
        "current_period_end": sub.current_period_end.and_then(from_unix),
        "canceled_at": sub.canceled_at.and_then(from_unix),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRequest {
    email: Option<String>,
    name: Option<String>,
}

/// `POST /stripe-create-customer`: reuse the customer for this email or
/// create one.
pub async fn create_customer(
    State(state): State<AppState>,
    principal: Principal,
    body: Option<ApiJson<CustomerRequest>>,
) -> Result<Json<Value>, ApiError> {
    let req = body.map(|ApiJson(r)| r).unwrap_or_default();
    let email = match req.email.as_deref() {
        Some(e) => required_email(Some(e), "Email is required")?,
        None => principal.email.clone(),
    };
    principal.require_self_or_admin(&email)?;

    let (customer, existing) = match state.payments.find_customer_by_email(&email).await? {
        Some(customer) => (customer, true),
        None => {
            let customer = state
                .payments
                .create_customer(&email, req.name.as_deref())
                .await?;
            (customer, false)
        }
    };

    let patch = MirrorPatch {
        stripe_customer_id: Some(customer.id.clone()),
        ..MirrorPatch::default()
    };
    write_mirror(&state, &email, &patch, None).await;
    info!(email = %email, customer = %customer.id, existing, "stripe customer ready");

    Ok(Json(json!({
        "success": true,
        "customerId": customer.id,
        "customer": customer,
        "existing": existing,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    customer_id: Option<String>,
    price_id: Option<String>,
    payment_method_id: Option<String>,
}

/// `POST /stripe-create-subscription`
pub async fn create_subscription(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<CreateSubscriptionRequest>,
) -> Result<Json<Value>, ApiError> {
    let missing = "customerId, priceId and paymentMethodId are required";
    let customer_id = required(req.customer_id.as_deref(), missing)?;
    let price_id = required(req.price_id.as_deref(), missing)?;
    let payment_method = required(req.payment_method_id.as_deref(), missing)?;

    let customer = owned_customer(&state, &principal, &customer_id).await?;
    let email = customer_email(&customer, &principal);

    state
        .payments
        .attach_payment_method(&payment_method, &customer_id)
        .await?;
    state
        .payments
        .set_default_payment_method(&customer_id, &payment_method)
        .await?;
    let sub = state
        .payments
        .create_subscription(&customer_id, &price_id, &payment_method, &email)
        .await?;

    let now = Utc::now();
    let patch = MirrorPatch {
        subscription_status: Some(sub.status.clone()),
        stripe_subscription_id: Some(sub.id.clone()),
        stripe_customer_id: Some(customer_id.clone()),
        has_subscription: Some(sub.status == "active"),
        subscription_start_date: Some(now),
        last_payment_date: Some(now),
        ..MirrorPatch::default()
    };
    let snapshot = snapshot_of(&sub, &email, now);
    write_mirror(&state, &email, &patch, Some((snapshot, local_event("created", &sub.status)))).await;
    info!(email = %email, subscription = %sub.id, status = %sub.status, "subscription created");

    let mut body = json!({
        "success": true,
        "subscription": sub,
        "status": sub.status,
        "message": "Subscription created successfully",
    });
    match sub.payment_intent() {
        Some(("requires_action", secret)) => {
            body["client_secret"] = json!(secret);
            body["requires_action"] = json!(true);
            body["message"] = json!("Additional authentication required");
        }
        Some(("succeeded", _)) => {
            body["message"] = json!("Subscription activated successfully");
        }
        _ => {}
    }
    Ok(Json(body))
}

/// `POST /stripe-get-subscription`: the caller's live subscription, if any.
pub async fn get_subscription(
    State(state): State<AppState>,
    principal: Principal,
    body: Option<ApiJson<CustomerRequest>>,
) -> Result<Json<Value>, ApiError> {
    let req = body.map(|ApiJson(r)| r).unwrap_or_default();
    let email = match req.email.as_deref() {
        Some(e) => required_email(Some(e), "Email is required")?,
        None => principal.email.clone(),
    };
    principal.require_self_or_admin(&email)?;

    let Some(customer) = state.payments.find_customer_by_email(&email).await? else {
        return Ok(Json(json!({
            "success": true,
            "customer": null,
            "subscription": null,
            "hasActiveSubscription": false,
            "message": "No active subscription",
        })));
    };

    let subs = state.payments.list_subscriptions(&customer.id, "all").await?;
    let Some(active) = subs.iter().find(|s| s.is_live()) else {
        return Ok(Json(json!({
            "success": true,
            "customer": customer,
            "subscription": null,
            "hasActiveSubscription": false,
            "message": "No active subscription",
        })));
    };

    let mut details = subscription_summary(active);
    if let Some(price) = active.price() {
        details["plan"] = json!({
            "id": price.id,
            "amount": price.unit_amount,
            "currency": price.currency,
            "interval": price.recurring.as_ref().map(|r| r.interval.clone()),
            "product": price.product,
        });
    }
    if let Some(pm_id) = customer.invoice_settings.default_payment_method.as_deref() {
        match state.payments.get_payment_method(pm_id).await {
            Ok(pm) => details["payment_method"] = payment_method_summary(&pm),
            Err(e) => warn!(payment_method = pm_id, error = %e, "payment method lookup failed"),
        }
    }

    Ok(Json(json!({
        "success": true,
        "customer": customer,
        "subscription": details,
        "hasActiveSubscription": true,
        "message": "Active subscription found",
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    subscription_id: Option<String>,
    #[serde(default)]
    immediate: bool,
}

/// `POST /stripe-cancel-subscription`: immediately, or at period end.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<CancelRequest>,
) -> Result<Json<Value>, ApiError> {
    let subscription_id = required(req.subscription_id.as_deref(), "SubscriptionId is required")?;
    let current = state.payments.get_subscription(&subscription_id).await?;
    let customer = owned_customer(&state, &principal, &current.customer).await?;
    let email = customer_email(&customer, &principal);

    let sub = if req.immediate {
        state.payments.cancel_subscription(&subscription_id).await?
    } else {
        state.payments.cancel_at_period_end(&subscription_id).await?
    };

    let now = Utc::now();
    let patch = MirrorPatch {
        subscription_status: Some(sub.status.clone()),
        has_subscription: Some(sub.status == "active" && !sub.cancel_at_period_end),
        cancel_at_period_end: Some(sub.cancel_at_period_end),
        subscription_canceled_at: Some(now),
        ..MirrorPatch::default()
    };
    let known = matches!(
        state.db.lock().await.find_subscription(&subscription_id),
        Ok(Some(_))
    );
    let record = known.then(|| {
        let mut snapshot = snapshot_of(&sub, &email, now);
        snapshot.canceled_date = Some(now);
        let kind = if req.immediate {
            "canceled_immediately"
        } else {
            "canceled_at_period_end"
        };
        (snapshot, local_event(kind, &sub.status))
    });
    write_mirror(&state, &email, &patch, record).await;
    info!(email = %email, subscription = %sub.id, immediate = req.immediate, "subscription canceled");

    let message = if req.immediate {
        "Subscription canceled immediately. Access has been revoked.".to_string()
    } else if sub.cancel_at_period_end {
        let until = sub
            .current_period_end
            .and_then(from_unix)
            .map(|d| format!(" ({})", d.format("%Y-%m-%d")))
            .unwrap_or_default();
        format!(
            "Subscription will be canceled at the end of the current billing period{until}. \
             You will continue to have access until then."
        )
    } else {
        "Subscription cancellation processed.".to_string()
    };

    Ok(Json(json!({
        "success": true,
        "subscription": subscription_summary(&sub),
        "message": message,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodRequest {
    customer_id: Option<String>,
    payment_method_id: Option<String>,
}

/// `POST /stripe-update-payment-method`: new default card, pushed to every
/// active subscription.
pub async fn update_payment_method(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<PaymentMethodRequest>,
) -> Result<Json<Value>, ApiError> {
    let missing = "CustomerId and paymentMethodId are required";
    let customer_id = required(req.customer_id.as_deref(), missing)?;
    let payment_method = required(req.payment_method_id.as_deref(), missing)?;
    owned_customer(&state, &principal, &customer_id).await?;

    state
        .payments
        .attach_payment_method(&payment_method, &customer_id)
        .await?;
    state
        .payments
        .set_default_payment_method(&customer_id, &payment_method)
        .await?;

    let active = state.payments.list_subscriptions(&customer_id, "active").await?;
    let updates = active
        .iter()
        .map(|sub| state.payments.set_subscription_payment_method(&sub.id, &payment_method));
    for result in join_all(updates).await {
        result?;
    }

    let pm = state.payments.get_payment_method(&payment_method).await?;
    info!(customer = %customer_id, updated = active.len(), "payment method updated");

    Ok(Json(json!({
        "success": true,
        "message": "Payment method updated successfully",
        "payment_method": payment_method_summary(&pm),
        "subscriptions_updated": active.len(),
    })))
}

/// `POST /stripe-webhook`: raw body, verified against `Stripe-Signature`.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let Some(verifier) = state.webhooks.as_ref() else {
        warn!("webhook received but no signing secret is configured");
        return Err(ApiError::Validation(
            "Webhook Error: signing secret not configured".to_string(),
        ));
    };

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());
    if let Err(e) = verifier.verify(&body, signature, Utc::now().timestamp()) {
        warn!(error = %e, "webhook signature rejected");
        return Err(ApiError::Validation(format!("Webhook Error: {e}")));
    }

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Webhook Error: {e}")))?;
    info!(event = %event.id, kind = %event.kind, "webhook received");

    mirror::apply_event(&state, &event).await;

    Ok(Json(json!({ "received": true, "type": event.kind })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestApp;
    use crate::payments::testing::subscription;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use portal_shared::types::Role;

    async fn post_webhook(app: &TestApp, payload: &[u8], signature: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/stripe-webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("stripe-signature", sig);
        }
        app.request(builder.body(Body::from(payload.to_vec())).unwrap()).await
    }

    async fn subscriber(app: &TestApp, email: &str, customer: &str) {
        app.seed_user(email, &[Role::Student]).await;
        app.payments.add_customer(customer, email);
        let patch = MirrorPatch {
            stripe_customer_id: Some(customer.to_string()),
            has_subscription: Some(true),
            subscription_status: Some("active".to_string()),
            ..MirrorPatch::default()
        };
        app.state
            .db
            .lock()
            .await
            .patch_subscription_mirror(email, &patch, Utc::now())
            .unwrap();
    }

    #[tokio::test]
    async fn signed_deletion_clears_the_mirror_once() {
        let app = TestApp::new().await;
        subscriber(&app, "p@x.com", "cus_1").await;

        let now = Utc::now().timestamp();
        let payload = json!({
            "id": "evt_del_1",
            "type": "customer.subscription.deleted",
            "created": now,
            "data": {"object": subscription("sub_1", "cus_1", "canceled")},
        })
        .to_string();
        let signature = app.webhooks.sign(payload.as_bytes(), now);

        let (status, body) = post_webhook(&app, payload.as_bytes(), Some(signature.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"received": true, "type": "customer.subscription.deleted"}));

        {
            let db = app.state.db.lock().await;
            let user = db.get_user("p@x.com").unwrap();
            assert!(!user.subscription.has_subscription);
            assert_eq!(user.subscription.subscription_status.as_deref(), Some("canceled"));
            assert!(user.subscription.subscription_end_date.is_some());
            assert_eq!(db.get_subscription("sub_1").unwrap().events.len(), 1);
        }

        // Redelivery is acknowledged and ignored.
        let (status, _) = post_webhook(&app, payload.as_bytes(), Some(signature)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            app.state.db.lock().await.get_subscription("sub_1").unwrap().events.len(),
            1
        );
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_changes() {
        let app = TestApp::new().await;
        subscriber(&app, "p@x.com", "cus_1").await;

        let now = Utc::now().timestamp();
        let payload = json!({
            "id": "evt_2",
            "type": "customer.subscription.deleted",
            "created": now,
            "data": {"object": subscription("sub_1", "cus_1", "canceled")},
        })
        .to_string();

        let (status, body) = post_webhook(&app, payload.as_bytes(), Some(format!("t={now},v1=00ff"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Webhook Error"));

        let (status, _) = post_webhook(&app, payload.as_bytes(), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let user = app.state.db.lock().await.get_user("p@x.com").unwrap();
        assert!(user.subscription.has_subscription);
    }

    #[tokio::test]
    async fn paid_invoice_ahead_of_activation_does_not_block_it() {
        let app = TestApp::new().await;
        app.seed_user("p@x.com", &[Role::Parent]).await;
        app.payments.add_customer("cus_1", "p@x.com");

        let now = Utc::now().timestamp();
        let deliveries = [
            json!({
                "id": "evt_created",
                "type": "customer.subscription.created",
                "created": now,
                "data": {"object": subscription("sub_1", "cus_1", "incomplete")},
            }),
            json!({
                "id": "evt_paid",
                "type": "invoice.payment_succeeded",
                "created": now + 2,
                "data": {"object": {"id": "in_1", "customer": "cus_1", "subscription": "sub_1", "amount_paid": 2500}},
            }),
            json!({
                "id": "evt_activated",
                "type": "customer.subscription.updated",
                "created": now + 1,
                "data": {"object": subscription("sub_1", "cus_1", "active")},
            }),
        ];
        for delivery in deliveries {
            let payload = delivery.to_string();
            let signature = app.webhooks.sign(payload.as_bytes(), now);
            let (status, _) = post_webhook(&app, payload.as_bytes(), Some(signature)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let db = app.state.db.lock().await;
        let user = db.get_user("p@x.com").unwrap();
        assert!(user.subscription.has_subscription);
        assert_eq!(user.subscription.subscription_status.as_deref(), Some("active"));
        assert_eq!(user.subscription.payment_status.as_deref(), Some("paid"));

        let record = db.get_subscription("sub_1").unwrap();
        assert_eq!(record.status.as_deref(), Some("active"));
        assert_eq!(record.events.len(), 3);
        assert_eq!(record.last_event_at.map(|t| t.timestamp()), Some(now + 1));
    }

    #[tokio::test]
    async fn invoice_failure_marks_payment_and_emails() {
        let app = TestApp::new().await;
        subscriber(&app, "p@x.com", "cus_1").await;

        let now = Utc::now().timestamp();
        let payload = json!({
            "id": "evt_inv_1",
            "type": "invoice.payment_failed",
            "created": now,
            "data": {"object": {"id": "in_1", "customer": "cus_1", "amount_due": 2500, "currency": "gbp"}},
        })
        .to_string();
        let signature = app.webhooks.sign(payload.as_bytes(), now);
        let (status, _) = post_webhook(&app, payload.as_bytes(), Some(signature)).await;
        assert_eq!(status, StatusCode::OK);

        let user = app.state.db.lock().await.get_user("p@x.com").unwrap();
        assert_eq!(user.subscription.payment_status.as_deref(), Some("failed"));
        assert_eq!(app.mailer.subjects().len(), 1);
    }

    #[tokio::test]
    async fn subscribe_flow() {
        let app = TestApp::new().await;
        app.seed_user("p@x.com", &[Role::Parent]).await;
        let token = app.token("p@x.com", &["parent"]);

        let (status, created) = app.post("/stripe-create-customer", &token, json!({"name": "Pat"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["existing"], false);
        let customer = created["customerId"].as_str().unwrap().to_string();

        let (_, again) = app.post("/stripe-create-customer", &token, json!({})).await;
        assert_eq!(again["customerId"], customer.as_str());
        assert_eq!(again["existing"], true);

        let (status, declined) = app
            .post(
                "/stripe-create-subscription",
                &token,
                json!({"customerId": customer, "priceId": "price_monthly", "paymentMethodId": "pm_declined"}),
            )
            .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(declined["code"], "card_declined");

        let (status, challenged) = app
            .post(
                "/stripe-create-subscription",
                &token,
                json!({"customerId": customer, "priceId": "price_monthly", "paymentMethodId": "pm_3ds"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(challenged["requires_action"], true);
        assert_eq!(challenged["client_secret"], "pi_secret_123");

        let (_, body) = app
            .post(
                "/stripe-create-subscription",
                &token,
                json!({"customerId": customer, "priceId": "price_monthly", "paymentMethodId": "pm_card"}),
            )
            .await;
        assert_eq!(body["message"], "Subscription activated successfully");

        let user = app.state.db.lock().await.get_user("p@x.com").unwrap();
        assert!(user.subscription.has_subscription);
        assert_eq!(user.subscription.stripe_customer_id.as_deref(), Some(customer.as_str()));

        let (_, got) = app.post("/stripe-get-subscription", &token, json!({})).await;
        assert_eq!(got["hasActiveSubscription"], true);
        assert_eq!(got["subscription"]["plan"]["amount"], 2500);
        assert_eq!(got["subscription"]["plan"]["interval"], "month");
        assert_eq!(got["subscription"]["payment_method"]["card"]["last4"], "4242");
    }

    #[tokio::test]
    async fn cancel_requires_ownership() {
        let app = TestApp::new().await;
        subscriber(&app, "p@x.com", "cus_1").await;
        app.payments.add_subscription(subscription("sub_9", "cus_1", "active"));

        let stranger = app.token("other@x.com", &["parent"]);
        let (status, _) = app
            .post("/stripe-cancel-subscription", &stranger, json!({"subscriptionId": "sub_9"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let owner = app.token("p@x.com", &["parent"]);
        let (status, body) = app
            .post("/stripe-cancel-subscription", &owner, json!({"subscriptionId": "sub_9"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("end of the current billing period"));
        assert_eq!(body["subscription"]["cancel_at_period_end"], true);

        let user = app.state.db.lock().await.get_user("p@x.com").unwrap();
        assert!(!user.subscription.has_subscription);
        assert!(user.subscription.cancel_at_period_end);

        let (status, _) = app
            .post("/stripe-cancel-subscription", &owner, json!({"subscriptionId": "sub_missing"}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_payment_method_touches_active_subscriptions() {
        let app = TestApp::new().await;
        subscriber(&app, "p@x.com", "cus_1").await;
        app.payments.add_subscription(subscription("sub_a", "cus_1", "active"));
        app.payments.add_subscription(subscription("sub_b", "cus_1", "canceled"));

        let token = app.token("p@x.com", &["parent"]);
        let (status, body) = app
            .post(
                "/stripe-update-payment-method",
                &token,
                json!({"customerId": "cus_1", "paymentMethodId": "pm_new"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscriptions_updated"], 1);
        assert_eq!(body["payment_method"]["id"], "pm_new");

        let subs = app.payments.subscriptions.lock().unwrap();
        let a = subs.iter().find(|s| s.id == "sub_a").unwrap();
        assert_eq!(a.default_payment_method_id(), Some("pm_new"));
    }
}
