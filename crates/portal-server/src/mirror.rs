//! Folds payment-processor webhook events into the local subscription
//! mirror.  Stripe stays authoritative; everything here is best-effort and
//! failures are logged, never surfaced to the webhook caller.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use portal_store::{EventOutcome, MirrorPatch, StoreError, SubscriptionEvent, SubscriptionRecord};

use crate::api::AppState;
use crate::error::ApiError;
use crate::mailer::{send_best_effort, templates};
use crate::payments::Subscription;
use crate::webhook::StripeEvent;

/// The invoice fields the mirror reads.
#[derive(Debug, Deserialize)]
struct Invoice {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    amount_paid: Option<i64>,
    #[serde(default)]
    amount_due: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    next_payment_attempt: Option<i64>,
    #[serde(default)]
    hosted_invoice_url: Option<String>,
}

pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Apply one verified event.  Never fails.
pub async fn apply_event(state: &AppState, event: &StripeEvent) {
    let result = match event.kind.as_str() {
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => apply_subscription_event(state, event).await,
        "invoice.payment_succeeded" | "invoice.payment_failed" | "invoice.upcoming" => {
            apply_invoice_event(state, event).await
        }
        other => {
            debug!(event = %event.id, kind = other, "ignoring unhandled webhook event");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(event = %event.id, kind = %event.kind, error = %e, "failed to mirror webhook event");
    }
}

/// Map a Stripe customer id to a portal user: local lookup first, then the
/// customer's email from Stripe.
async fn resolve_user_email(state: &AppState, customer_id: &str) -> Result<Option<String>, ApiError> {
    {
        let db = state.db.lock().await;
        if let Some(user) = db.find_user_by_customer_id(customer_id)? {
            return Ok(Some(user.email));
        }
    }

    let customer = state.payments.get_customer(customer_id).await?;
    Ok(customer.email.map(|e| e.trim().to_ascii_lowercase()))
}

/// Subscription record snapshot as reported by a Stripe subscription object.
pub fn snapshot_of(sub: &Subscription, user_email: &str, now: DateTime<Utc>) -> SubscriptionRecord {
    let price = sub.price();
    SubscriptionRecord {
        id: sub.id.clone(),
        user_email: user_email.to_string(),
        customer_id: Some(sub.customer.clone()),
        price_id: price.map(|p| p.id.clone()),
        status: Some(sub.status.clone()),
        cancel_at_period_end: sub.cancel_at_period_end,
        amount: price.and_then(|p| p.unit_amount),
        currency: price.and_then(|p| p.currency.clone()),
        created_date: from_unix(sub.created).filter(|_| sub.created > 0).unwrap_or(now),
        canceled_date: sub.canceled_at.and_then(from_unix),
        ended_date: sub.ended_at.and_then(from_unix),
        last_event_at: None,
        events: Vec::new(),
        version: 0,
    }
}

async fn apply_subscription_event(state: &AppState, event: &StripeEvent) -> Result<(), ApiError> {
    let sub: Subscription = serde_json::from_value(event.data.object.clone())
        .map_err(|e| ApiError::Validation(format!("Invalid subscription object: {e}")))?;

    let Some(email) = resolve_user_email(state, &sub.customer).await? else {
        warn!(customer = %sub.customer, "no user found for subscription customer");
        return Ok(());
    };

    let now = Utc::now();
    let kind = event.kind.trim_start_matches("customer.subscription.");
    let mut snapshot = snapshot_of(&sub, &email, now);

    let patch = match kind {
        "created" => MirrorPatch {
            subscription_status: Some(sub.status.clone()),
            stripe_subscription_id: Some(sub.id.clone()),
            stripe_customer_id: Some(sub.customer.clone()),
            has_subscription: Some(sub.status == "active"),
            subscription_start_date: Some(snapshot.created_date),
            ..MirrorPatch::default()
        },
        "updated" => MirrorPatch {
            subscription_status: Some(sub.status.clone()),
            has_subscription: Some(sub.status == "active" && !sub.cancel_at_period_end),
            cancel_at_period_end: Some(sub.cancel_at_period_end),
            ..MirrorPatch::default()
        },
        _ => {
            let ended = snapshot.ended_date.unwrap_or(now);
            snapshot.status = Some("canceled".to_string());
            snapshot.ended_date = Some(ended);
            MirrorPatch {
                subscription_status: Some("canceled".to_string()),
                has_subscription: Some(false),
                subscription_end_date: Some(ended),
                ..MirrorPatch::default()
            }
        }
    };

    let log_entry = SubscriptionEvent {
        event_id: Some(event.id.clone()),
        kind: kind.to_string(),
        timestamp: from_unix(event.created).unwrap_or(now),
        status: snapshot.status.clone(),
        data: serde_json::json!({ "cancelAtPeriodEnd": sub.cancel_at_period_end }),
    };

    let mut db = state.db.lock().await;
    match db.record_subscription_event(&snapshot, &log_entry)? {
        EventOutcome::Applied => {
            if !db.patch_subscription_mirror(&email, &patch, now)? {
                warn!(email = %email, "user vanished before mirror patch");
            }
            info!(email = %email, subscription = %sub.id, kind, "subscription mirrored");
        }
        EventOutcome::Stale => {
            info!(subscription = %sub.id, event = %event.id, "out-of-order event logged, status kept");
        }
        EventOutcome::Duplicate => {
            debug!(event = %event.id, "duplicate webhook delivery ignored");
        }
    }
    Ok(())
}

async fn apply_invoice_event(state: &AppState, event: &StripeEvent) -> Result<(), ApiError> {
    let invoice: Invoice = serde_json::from_value(event.data.object.clone())
        .map_err(|e| ApiError::Validation(format!("Invalid invoice object: {e}")))?;

    let Some(customer) = invoice.customer.as_deref() else {
        warn!(event = %event.id, "invoice without customer");
        return Ok(());
    };
    let Some(email) = resolve_user_email(state, customer).await? else {
        warn!(customer, "no user found for invoice customer");
        return Ok(());
    };

    let now = Utc::now();
    let kind = event.kind.trim_start_matches("invoice.");
    let currency = invoice.currency.as_deref().unwrap_or("gbp");

    let patch = match kind {
        "payment_succeeded" => Some(MirrorPatch {
            last_payment_date: Some(invoice.created.and_then(from_unix).unwrap_or(now)),
            payment_status: Some("paid".to_string()),
            ..MirrorPatch::default()
        }),
        "payment_failed" => Some(MirrorPatch {
            payment_status: Some("failed".to_string()),
            last_payment_failure: Some(now),
            ..MirrorPatch::default()
        }),
        _ => None,
    };

    let duplicate = {
        let mut db = state.db.lock().await;
        let mut duplicate = false;

        // Invoice events only extend the log of a subscription we already know.
        if let Some(sub_id) = invoice.subscription.as_deref() {
            let log_entry = SubscriptionEvent {
                event_id: Some(event.id.clone()),
                kind: kind.to_string(),
                timestamp: from_unix(event.created).unwrap_or(now),
                status: None,
                data: serde_json::json!({
                    "invoiceId": invoice.id,
                    "amountPaid": invoice.amount_paid,
                    "amountDue": invoice.amount_due,
                }),
            };
            duplicate = match db.append_subscription_event(sub_id, &log_entry) {
                Ok(outcome) => outcome == EventOutcome::Duplicate,
                Err(StoreError::NotFound) => false,
                Err(e) => return Err(e.into()),
            };
        }

        if !duplicate {
            if let Some(patch) = &patch {
                db.patch_subscription_mirror(&email, patch, now)?;
            }
        }
        duplicate
    };

    if duplicate {
        debug!(event = %event.id, "duplicate webhook delivery ignored");
        return Ok(());
    }

    match kind {
        "payment_failed" => {
            let message = templates::payment_failed(
                &email,
                invoice.amount_due,
                currency,
                invoice.hosted_invoice_url.as_deref(),
            );
            send_best_effort(state.mailer.as_ref(), &message).await;
        }
        "upcoming" => {
            let due = invoice.next_payment_attempt.and_then(from_unix);
            info!(email = %email, amount = ?invoice.amount_due, "upcoming invoice");
            let message = templates::upcoming_invoice(&email, invoice.amount_due, currency, due);
            send_best_effort(state.mailer.as_ref(), &message).await;
        }
        _ => info!(email = %email, "payment recorded"),
    }
    Ok(())
}
