//! Domain events for the banking context.

use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, EventMetadata};
use chronicle_core::repository::StoredEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type for `AccountOpened`.
pub const ACCOUNT_OPENED_EVENT_TYPE: &str = "banking.account_opened";
/// Event type for `MoneyDeposited`.
pub const MONEY_DEPOSITED_EVENT_TYPE: &str = "banking.money_deposited";
/// Event type for `MoneyWithdrawn`.
pub const MONEY_WITHDRAWN_EVENT_TYPE: &str = "banking.money_withdrawn";
/// Event type for `MoneyTransferSent`.
pub const MONEY_TRANSFER_SENT_EVENT_TYPE: &str = "banking.money_transfer_sent";
/// Event type for `MoneyTransferReceived`.
pub const MONEY_TRANSFER_RECEIVED_EVENT_TYPE: &str = "banking.money_transfer_received";
/// Event type for `MoneyTransferRefunded`.
pub const MONEY_TRANSFER_REFUNDED_EVENT_TYPE: &str = "banking.money_transfer_refunded";

/// Emitted when an account is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    /// The account identifier.
    pub account_id: Uuid,
    /// Account holder name.
    pub owner: String,
}

/// Emitted when money is deposited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyDeposited {
    /// The account identifier.
    pub account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
}

/// Emitted when money is withdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyWithdrawn {
    /// The account identifier.
    pub account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
}

/// Leg of a money transfer, shared by the transfer events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyTransfer {
    /// Transfer identifier.
    pub transfer_id: Uuid,
    /// Debited account.
    pub source_account_id: Uuid,
    /// Credited account.
    pub target_account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
}

/// Event payload variants for the banking context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEventKind {
    /// The account was opened.
    AccountOpened(AccountOpened),
    /// Money was deposited.
    MoneyDeposited(MoneyDeposited),
    /// Money was withdrawn.
    MoneyWithdrawn(MoneyWithdrawn),
    /// The source account was debited for a transfer.
    MoneyTransferSent(MoneyTransfer),
    /// The target account was credited for a transfer.
    MoneyTransferReceived(MoneyTransfer),
    /// The source account was credited back for a transfer.
    MoneyTransferRefunded(MoneyTransfer),
}

impl AccountEventKind {
    /// Event type name of this variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AccountOpened(_) => ACCOUNT_OPENED_EVENT_TYPE,
            Self::MoneyDeposited(_) => MONEY_DEPOSITED_EVENT_TYPE,
            Self::MoneyWithdrawn(_) => MONEY_WITHDRAWN_EVENT_TYPE,
            Self::MoneyTransferSent(_) => MONEY_TRANSFER_SENT_EVENT_TYPE,
            Self::MoneyTransferReceived(_) => MONEY_TRANSFER_RECEIVED_EVENT_TYPE,
            Self::MoneyTransferRefunded(_) => MONEY_TRANSFER_REFUNDED_EVENT_TYPE,
        }
    }
}

/// Domain event envelope for the banking context.
#[derive(Debug, Clone)]
pub struct AccountEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: AccountEventKind,
}

impl AccountEvent {
    /// Rebuilds an event from its stored form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload does not decode.
    pub fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError> {
        let kind: AccountEventKind = serde_json::from_value(stored.payload.clone())?;
        Ok(Self {
            metadata: EventMetadata {
                event_id: stored.event_id,
                event_type: stored.event_type.clone(),
                aggregate_id: stored.aggregate_id,
                sequence_number: stored.sequence_number,
                correlation_id: stored.correlation_id,
                causation_id: stored.causation_id,
                occurred_at: stored.occurred_at,
            },
            kind,
        })
    }
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(&self.kind).unwrap_or_default()
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
