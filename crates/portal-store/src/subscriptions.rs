//! Local mirror of payment-processor subscriptions with an append-only event
//! log per subscription.

use rusqlite::{params, Connection, OptionalExtension};

use crate::codec::{get_bool, get_json, get_opt_ts, get_ts, opt_ts, to_json, ts};
use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{EventOutcome, SubscriptionEvent, SubscriptionRecord};

const SUBSCRIPTION_COLUMNS: &str = "id, user_email, customer_id, price_id, status, \
     cancel_at_period_end, amount, currency, created_date, canceled_date, ended_date, \
     last_event_at, events, version";

impl Database {
    pub fn get_subscription(&self, id: &str) -> Result<SubscriptionRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1"),
                params![id],
                row_to_subscription,
            )
            .map_err(not_found)
    }

    pub fn find_subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>> {
        select_subscription(self.conn(), id)
    }

    /// Fold one status-changing webhook event into the subscription mirror.
    ///
    /// `snapshot` carries the subscription state reported by the event; its
    /// `events`, `last_event_at` and `version` fields are ignored.  The event
    /// is appended to the log unless its id was already recorded.  Status
    /// fields are overwritten only when the event is not older than the newest
    /// status event already applied, so out-of-order deliveries never roll
    /// state back.
    pub fn record_subscription_event(
        &mut self,
        snapshot: &SubscriptionRecord,
        event: &SubscriptionEvent,
    ) -> Result<EventOutcome> {
        self.fold_subscription_event(snapshot, event, true)
    }

    /// Fold the gateway's answer to a local billing call into the mirror.
    ///
    /// Always applied.  `last_event_at` holds processor event times only, so
    /// it is left as is.
    pub fn record_local_subscription_change(
        &mut self,
        snapshot: &SubscriptionRecord,
        event: &SubscriptionEvent,
    ) -> Result<EventOutcome> {
        self.fold_subscription_event(snapshot, event, false)
    }

    /// Append an event that changes no status (invoices) to a known
    /// subscription's log.  `NotFound` if the subscription is unknown.
    pub fn append_subscription_event(&mut self, id: &str, event: &SubscriptionEvent) -> Result<EventOutcome> {
        let tx = self.conn_mut().transaction()?;
        let existing = select_subscription(&tx, id)?.ok_or(StoreError::NotFound)?;

        let outcome = if already_logged(&existing, event) {
            EventOutcome::Duplicate
        } else {
            let mut events = existing.events;
            events.push(event.clone());
            tx.execute(
                "UPDATE subscriptions SET events = ?2, version = version + 1 WHERE id = ?1",
                params![id, to_json(&events)?],
            )?;
            EventOutcome::Applied
        };

        tx.commit()?;
        tracing::debug!(subscription = %id, event = %event.kind, ?outcome, "appended subscription event");
        Ok(outcome)
    }

    fn fold_subscription_event(
        &mut self,
        snapshot: &SubscriptionRecord,
        event: &SubscriptionEvent,
        ordered: bool,
    ) -> Result<EventOutcome> {
        let event_at = ordered.then(|| ts(&event.timestamp));
        let tx = self.conn_mut().transaction()?;

        let outcome = match select_subscription(&tx, &snapshot.id)? {
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1)"
                    ),
                    params![
                        snapshot.id,
                        snapshot.user_email,
                        snapshot.customer_id,
                        snapshot.price_id,
                        snapshot.status,
                        snapshot.cancel_at_period_end,
                        snapshot.amount,
                        snapshot.currency,
                        ts(&snapshot.created_date),
                        opt_ts(&snapshot.canceled_date),
                        opt_ts(&snapshot.ended_date),
                        event_at,
                        to_json(std::slice::from_ref(event))?,
                    ],
                )?;
                EventOutcome::Applied
            }
            Some(existing) if already_logged(&existing, event) => EventOutcome::Duplicate,
            Some(existing) => {
                let stale = ordered
                    && existing
                        .last_event_at
                        .is_some_and(|last| event.timestamp < last);
                let mut events = existing.events;
                events.push(event.clone());

                if stale {
                    tx.execute(
                        "UPDATE subscriptions SET events = ?2, version = version + 1
                         WHERE id = ?1",
                        params![snapshot.id, to_json(&events)?],
                    )?;
                    EventOutcome::Stale
                } else {
                    tx.execute(
                        "UPDATE subscriptions SET user_email = ?2, customer_id = ?3,
                                price_id = COALESCE(?4, price_id), status = ?5,
                                cancel_at_period_end = ?6, amount = COALESCE(?7, amount),
                                currency = COALESCE(?8, currency),
                                canceled_date = COALESCE(?9, canceled_date),
                                ended_date = COALESCE(?10, ended_date),
                                last_event_at = COALESCE(?11, last_event_at),
                                events = ?12, version = version + 1
                         WHERE id = ?1",
                        params![
                            snapshot.id,
                            snapshot.user_email,
                            snapshot.customer_id,
                            snapshot.price_id,
                            snapshot.status,
                            snapshot.cancel_at_period_end,
                            snapshot.amount,
                            snapshot.currency,
                            opt_ts(&snapshot.canceled_date),
                            opt_ts(&snapshot.ended_date),
                            event_at,
                            to_json(&events)?,
                        ],
                    )?;
                    EventOutcome::Applied
                }
            }
        };

        tx.commit()?;
        tracing::debug!(
            subscription = %snapshot.id,
            event = %event.kind,
            ordered,
            ?outcome,
            "recorded subscription event"
        );
        Ok(outcome)
    }
}

fn already_logged(existing: &SubscriptionRecord, event: &SubscriptionEvent) -> bool {
    event.event_id.as_deref().is_some_and(|id| {
        existing
            .events
            .iter()
            .any(|e| e.event_id.as_deref() == Some(id))
    })
}

fn select_subscription(conn: &Connection, id: &str) -> Result<Option<SubscriptionRecord>> {
    let sub = conn
        .query_row(
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1"),
            params![id],
            row_to_subscription,
        )
        .optional()?;
    Ok(sub)
}

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubscriptionRecord> {
    Ok(SubscriptionRecord {
        id: row.get("id")?,
        user_email: row.get("user_email")?,
        customer_id: row.get("customer_id")?,
        price_id: row.get("price_id")?,
        status: row.get("status")?,
        cancel_at_period_end: get_bool(row, "cancel_at_period_end")?,
        amount: row.get("amount")?,
        currency: row.get("currency")?,
        created_date: get_ts(row, "created_date")?,
        canceled_date: get_opt_ts(row, "canceled_date")?,
        ended_date: get_opt_ts(row, "ended_date")?,
        last_event_at: get_opt_ts(row, "last_event_at")?,
        events: get_json(row, "events")?,
        version: row.get("version")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn snapshot(status: &str) -> SubscriptionRecord {
        SubscriptionRecord {
            id: "sub_1".into(),
            user_email: "p@x.com".into(),
            customer_id: Some("cus_1".into()),
            price_id: Some("price_1".into()),
            status: Some(status.to_string()),
            cancel_at_period_end: false,
            amount: Some(2500),
            currency: Some("gbp".into()),
            created_date: Utc::now(),
            canceled_date: None,
            ended_date: None,
            last_event_at: None,
            events: Vec::new(),
            version: 0,
        }
    }

    fn event(id: &str, kind: &str, at: DateTime<Utc>, status: &str) -> SubscriptionEvent {
        SubscriptionEvent {
            event_id: Some(id.to_string()),
            kind: kind.to_string(),
            timestamp: at,
            status: Some(status.to_string()),
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn first_event_creates_record() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_subscription("sub_1"), Err(StoreError::NotFound)));

        let t0 = Utc::now();
        let out = db
            .record_subscription_event(&snapshot("active"), &event("evt_1", "created", t0, "active"))
            .unwrap();
        assert_eq!(out, EventOutcome::Applied);

        let sub = db.get_subscription("sub_1").unwrap();
        assert_eq!(sub.status.as_deref(), Some("active"));
        assert_eq!(sub.events.len(), 1);
    }

    #[test]
    fn redelivered_event_is_dropped() {
        let mut db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        let e = event("evt_1", "created", t0, "active");
        db.record_subscription_event(&snapshot("active"), &e).unwrap();

        let out = db.record_subscription_event(&snapshot("active"), &e).unwrap();
        assert_eq!(out, EventOutcome::Duplicate);
        let sub = db.get_subscription("sub_1").unwrap();
        assert_eq!(sub.events.len(), 1);
        assert_eq!(sub.version, 1);
    }

    #[test]
    fn older_event_is_logged_but_does_not_roll_back() {
        let mut db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        db.record_subscription_event(
            &snapshot("canceled"),
            &event("evt_2", "deleted", t0, "canceled"),
        )
        .unwrap();

        let out = db
            .record_subscription_event(
                &snapshot("active"),
                &event("evt_1", "updated", t0 - Duration::seconds(30), "active"),
            )
            .unwrap();
        assert_eq!(out, EventOutcome::Stale);

        let sub = db.get_subscription("sub_1").unwrap();
        assert_eq!(sub.status.as_deref(), Some("canceled"));
        assert_eq!(sub.events.len(), 2);
        assert_eq!(sub.last_event_at.map(|t| t.timestamp_millis()), Some(t0.timestamp_millis()));
    }

    #[test]
    fn newer_event_overwrites_status() {
        let mut db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        db.record_subscription_event(&snapshot("active"), &event("evt_1", "created", t0, "active"))
            .unwrap();

        let mut snap = snapshot("past_due");
        snap.cancel_at_period_end = true;
        let out = db
            .record_subscription_event(
                &snap,
                &event("evt_2", "updated", t0 + Duration::seconds(5), "past_due"),
            )
            .unwrap();
        assert_eq!(out, EventOutcome::Applied);

        let sub = db.find_subscription("sub_1").unwrap().unwrap();
        assert_eq!(sub.status.as_deref(), Some("past_due"));
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.version, 2);
    }

    #[test]
    fn appended_events_leave_ordering_alone() {
        let mut db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        assert!(matches!(
            db.append_subscription_event("sub_1", &event("evt_0", "payment_succeeded", t0, "active")),
            Err(StoreError::NotFound)
        ));

        db.record_subscription_event(
            &snapshot("incomplete"),
            &event("evt_1", "created", t0, "incomplete"),
        )
        .unwrap();
        let invoice = event("evt_2", "payment_succeeded", t0 + Duration::seconds(2), "incomplete");
        assert_eq!(db.append_subscription_event("sub_1", &invoice).unwrap(), EventOutcome::Applied);
        assert_eq!(db.append_subscription_event("sub_1", &invoice).unwrap(), EventOutcome::Duplicate);

        let out = db
            .record_subscription_event(
                &snapshot("active"),
                &event("evt_3", "updated", t0 + Duration::seconds(1), "active"),
            )
            .unwrap();
        assert_eq!(out, EventOutcome::Applied);
        assert_eq!(db.get_subscription("sub_1").unwrap().status.as_deref(), Some("active"));
    }

    #[test]
    fn local_changes_do_not_stamp_event_time() {
        let mut db = Database::open_in_memory().unwrap();
        let mut local = event("local", "created", Utc::now(), "active");
        local.event_id = None;
        db.record_local_subscription_change(&snapshot("active"), &local).unwrap();
        assert!(db.get_subscription("sub_1").unwrap().last_event_at.is_none());

        let earlier = Utc::now() - Duration::seconds(60);
        let out = db
            .record_subscription_event(&snapshot("past_due"), &event("evt_1", "updated", earlier, "past_due"))
            .unwrap();
        assert_eq!(out, EventOutcome::Applied);

        let sub = db.get_subscription("sub_1").unwrap();
        assert_eq!(sub.status.as_deref(), Some("past_due"));
        assert_eq!(sub.last_event_at.map(|t| t.timestamp()), Some(earlier.timestamp()));
    }
}
