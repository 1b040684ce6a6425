//! The money-transfer saga.
//!
//! Started by `MoneyTransferSent`, it asks the target account to receive the
//! money and waits a day for `MoneyTransferReceived`. If the credit has not
//! happened by then, it refunds the source account.

use chrono::{DateTime, Duration, Utc};
use chronicle_core::saga::{SagaInstance, SagaState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::{ReceiveMoneyTransfer, RefundMoneyTransfer};
use super::events::MoneyTransfer;

/// How long the saga waits for the target account to be credited.
#[must_use]
pub fn transfer_timeout() -> Duration {
    Duration::days(1)
}

/// Persisted state of a money transfer in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyTransferState {
    /// Debited account.
    pub source_account_id: Uuid,
    /// Credited account.
    pub target_account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
    /// Whether the source was refunded.
    pub refunded: bool,
}

impl SagaState for MoneyTransferState {
    const SAGA_TYPE: &'static str = "banking.money_transfer";
}

/// The saga instance type, correlated by transfer id.
pub type MoneyTransferSaga = SagaInstance<MoneyTransferState>;

/// Reacts to the source account being debited: records the transfer,
/// schedules the refund deadline and asks the target to receive the money.
pub fn on_transfer_sent(saga: &mut MoneyTransferSaga, sent: &MoneyTransfer, now: DateTime<Utc>) {
    saga.state = MoneyTransferState {
        source_account_id: sent.source_account_id,
        target_account_id: sent.target_account_id,
        amount: sent.amount,
        refunded: false,
    };
    saga.schedule_timeout(now + transfer_timeout());
    saga.publish(ReceiveMoneyTransfer {
        transfer_id: sent.transfer_id,
        source_account_id: sent.source_account_id,
        target_account_id: sent.target_account_id,
        amount: sent.amount,
    });
}

/// Reacts to the target account being credited: the transfer is done.
pub fn on_transfer_received(saga: &mut MoneyTransferSaga) {
    saga.mark_completed();
}

/// Reacts to the deadline passing without a credit: refunds the source.
pub fn on_transfer_timed_out(saga: &mut MoneyTransferSaga) {
    let transfer_id = saga.correlation_id();
    let state = saga.state.clone();
    saga.publish(RefundMoneyTransfer {
        transfer_id,
        source_account_id: state.source_account_id,
        target_account_id: state.target_account_id,
        amount: state.amount,
    });
    saga.state.refunded = true;
    saga.mark_completed();
}
