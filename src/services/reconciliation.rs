//! Background sweep over abandoned wallet orders.
//!
//! A wallet order whose gateway notification never arrives would otherwise
//! hold its stock forever. Every tick, orders older than the pending TTL are
//! queried once more. Those the gateway reports as paid are kept; those it
//! still reports as pending or failed are marked PAYMENT_FAILED and
//! cancelled, which credits their stock back. When the gateway cannot be
//! reached the order stays pending until a later sweep gets an answer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::entities::invoice::Model as InvoiceModel;
use crate::entities::PaymentStatus;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::checkout::CheckoutService;
use crate::services::orders::{PaymentOutcome, Settlement};

const SWEEP_BATCH: u64 = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub paid: usize,
    pub expired: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct PendingPaymentReconciler {
    checkout: CheckoutService,
    event_sender: Arc<EventSender>,
    pending_ttl: Duration,
    interval: Duration,
}

impl PendingPaymentReconciler {
    pub fn new(
        checkout: CheckoutService,
        event_sender: Arc<EventSender>,
        pending_ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            checkout,
            event_sender,
            pending_ttl,
            interval,
        }
    }

    /// One sweep over wallet orders created before `now - pending_ttl`.
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReconcileReport, ServiceError> {
        let ttl = chrono::Duration::from_std(self.pending_ttl)
            .map_err(|e| ServiceError::InternalError(format!("invalid pending TTL: {}", e)))?;
        let cutoff = now - ttl;

        let stale = self
            .checkout
            .orders()
            .find_stale_wallet_orders(cutoff, SWEEP_BATCH)
            .await?;

        let mut report = ReconcileReport {
            examined: stale.len(),
            ..Default::default()
        };

        for order in stale {
            match self.reconcile_order(&order).await {
                Ok(true) => report.paid += 1,
                Ok(false) => report.expired += 1,
                Err(e) => {
                    report.errors += 1;
                    error!(order_id = %order.id, error = %e, "Failed to reconcile pending order");
                }
            }
        }

        gauge!("bookstore_reconcile.last_examined", report.examined as f64);
        if report.examined > 0 {
            info!(
                examined = report.examined,
                paid = report.paid,
                expired = report.expired,
                errors = report.errors,
                "Pending payment sweep finished"
            );
        } else {
            debug!("No stale wallet orders");
        }
        Ok(report)
    }

    /// Returns `true` when the order turned out to be paid and was kept.
    /// A gateway error is returned untouched and leaves the order pending.
    async fn reconcile_order(&self, order: &InvoiceModel) -> Result<bool, ServiceError> {
        if order.payment_status == PaymentStatus::PendingPayment {
            let settled = match self.checkout.query_and_settle(order).await {
                Ok(Some(settlement)) => settlement.into_invoice(),
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Gateway query failed, order left pending");
                    return Err(e);
                }
                Ok(None) => {
                    // still pending after the TTL: give up on it
                    match self
                        .checkout
                        .orders()
                        .settle_payment(
                            order.id,
                            PaymentOutcome::Failed {
                                reason: "payment not completed before expiry".to_string(),
                            },
                        )
                        .await?
                    {
                        Settlement::Applied(m) | Settlement::AlreadySettled(m) => m,
                    }
                }
            };
            if settled.payment_status == PaymentStatus::Paid {
                return Ok(true);
            }
        }

        match self.checkout.cancel_order(order.id).await {
            Ok(_) => {}
            // an admin got there first
            Err(ServiceError::OrderAlreadyCancelled(_)) => return Ok(false),
            Err(e) => return Err(e),
        }

        counter!("bookstore_reconcile.expired", 1);
        warn!(order_id = %order.id, "Expired unpaid wallet order, stock credited back");
        self.event_sender
            .send_or_log(Event::PendingOrderExpired(order.id))
            .await;
        Ok(false)
    }

    /// Runs [`PendingPaymentReconciler::run_once`] every `interval` until
    /// `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), ttl_secs = self.pending_ttl.as_secs(), "Pending payment reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        error!(error = %e, "Pending payment sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Pending payment reconciler stopping");
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
