//! Aggregate roots for the banking context.

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::event::EventMetadata;
use chronicle_core::repository::StoredEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{
    AccountEvent, AccountEventKind, AccountOpened, MoneyDeposited, MoneyTransfer, MoneyWithdrawn,
};

/// Snapshot state of an [`Account`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Account holder, `None` until opened.
    pub owner: Option<String>,
    /// Balance in minor units.
    pub balance: i64,
}

/// The aggregate root for a bank account.
#[derive(Debug, Clone)]
pub struct Account {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Current version (event count).
    pub(crate) version: i64,
    owner: Option<String>,
    balance: i64,
    /// Uncommitted events pending persistence.
    uncommitted_events: Vec<AccountEvent>,
}

impl Account {
    /// Account holder, `None` until opened.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Balance in minor units, including uncommitted changes.
    #[must_use]
    pub fn balance(&self) -> i64 {
        self.uncommitted_events
            .iter()
            .fold(self.balance, |balance, event| balance + balance_delta(&event.kind))
    }

    /// Whether the account was opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.owner.is_some()
            || self
                .uncommitted_events
                .iter()
                .any(|event| matches!(event.kind, AccountEventKind::AccountOpened(_)))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn next_sequence_number(&self) -> i64 {
        self.version + self.uncommitted_events.len() as i64 + 1
    }

    fn record(&mut self, kind: AccountEventKind, correlation_id: Uuid, clock: &dyn Clock) {
        let event = AccountEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: kind.event_type().to_owned(),
                aggregate_id: self.id,
                sequence_number: self.next_sequence_number(),
                correlation_id,
                causation_id: correlation_id,
                occurred_at: clock.now(),
            },
            kind,
        };
        self.uncommitted_events.push(event);
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "account {} is not open",
                self.id
            )))
        }
    }

    fn ensure_positive(amount: i64) -> Result<(), DomainError> {
        if amount > 0 {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "amount must be positive, got {amount}"
            )))
        }
    }

    fn ensure_funds(&self, amount: i64) -> Result<(), DomainError> {
        let balance = self.balance();
        if balance >= amount {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "insufficient funds in account {}: balance {balance}, requested {amount}",
                self.id
            )))
        }
    }

    /// Opens the account, producing an `AccountOpened` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the account is already open or
    /// `owner` is blank.
    pub fn open(
        &mut self,
        owner: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.is_open() {
            return Err(DomainError::Validation(format!(
                "account {} is already open",
                self.id
            )));
        }
        if owner.trim().is_empty() {
            return Err(DomainError::Validation("owner must not be blank".to_owned()));
        }
        self.record(
            AccountEventKind::AccountOpened(AccountOpened {
                account_id: self.id,
                owner: owner.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Deposits money, producing a `MoneyDeposited` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the account is not open or the
    /// amount is not positive.
    pub fn deposit(
        &mut self,
        amount: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        Self::ensure_positive(amount)?;
        self.record(
            AccountEventKind::MoneyDeposited(MoneyDeposited {
                account_id: self.id,
                amount,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Withdraws money, producing a `MoneyWithdrawn` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the account is not open, the
    /// amount is not positive, or the balance does not cover it.
    pub fn withdraw(
        &mut self,
        amount: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        Self::ensure_positive(amount)?;
        self.ensure_funds(amount)?;
        self.record(
            AccountEventKind::MoneyWithdrawn(MoneyWithdrawn {
                account_id: self.id,
                amount,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Debits this account for a transfer, producing a `MoneyTransferSent`
    /// event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the account is not open, the
    /// amount is not positive, the target is this account, or the balance
    /// does not cover the amount.
    pub fn send_transfer(
        &mut self,
        transfer_id: Uuid,
        target_account_id: Uuid,
        amount: i64,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        Self::ensure_positive(amount)?;
        if target_account_id == self.id {
            return Err(DomainError::Validation(format!(
                "account {} cannot transfer to itself",
                self.id
            )));
        }
        self.ensure_funds(amount)?;
        self.record(
            AccountEventKind::MoneyTransferSent(MoneyTransfer {
                transfer_id,
                source_account_id: self.id,
                target_account_id,
                amount,
            }),
            transfer_id,
            clock,
        );
        Ok(())
    }

    /// Credits this account for a transfer, producing a
    /// `MoneyTransferReceived` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the account is not open or the
    /// amount is not positive.
    pub fn receive_transfer(
        &mut self,
        transfer_id: Uuid,
        source_account_id: Uuid,
        amount: i64,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        Self::ensure_positive(amount)?;
        self.record(
            AccountEventKind::MoneyTransferReceived(MoneyTransfer {
                transfer_id,
                source_account_id,
                target_account_id: self.id,
                amount,
            }),
            transfer_id,
            clock,
        );
        Ok(())
    }

    /// Credits a transfer's amount back to this account, producing a
    /// `MoneyTransferRefunded` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the account is not open or the
    /// amount is not positive.
    pub fn refund_transfer(
        &mut self,
        transfer_id: Uuid,
        target_account_id: Uuid,
        amount: i64,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        Self::ensure_positive(amount)?;
        self.record(
            AccountEventKind::MoneyTransferRefunded(MoneyTransfer {
                transfer_id,
                source_account_id: self.id,
                target_account_id,
                amount,
            }),
            transfer_id,
            clock,
        );
        Ok(())
    }
}

fn balance_delta(kind: &AccountEventKind) -> i64 {
    match kind {
        AccountEventKind::AccountOpened(_) => 0,
        AccountEventKind::MoneyDeposited(MoneyDeposited { amount, .. })
        | AccountEventKind::MoneyTransferReceived(MoneyTransfer { amount, .. })
        | AccountEventKind::MoneyTransferRefunded(MoneyTransfer { amount, .. }) => *amount,
        AccountEventKind::MoneyWithdrawn(MoneyWithdrawn { amount, .. })
        | AccountEventKind::MoneyTransferSent(MoneyTransfer { amount, .. }) => -*amount,
    }
}

impl AggregateRoot for Account {
    type Event = AccountEvent;
    type Snapshot = AccountSnapshot;

    const AGGREGATE_TYPE: &'static str = "banking.account";

    fn new(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            owner: None,
            balance: 0,
            uncommitted_events: Vec::new(),
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        if let AccountEventKind::AccountOpened(payload) = &event.kind {
            self.owner = Some(payload.owner.clone());
        }
        self.balance += balance_delta(&event.kind);
        self.version += 1;
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }

    fn decode_event(stored: &StoredEvent) -> Result<Self::Event, DomainError> {
        AccountEvent::from_stored(stored)
    }

    fn to_snapshot(&self) -> Self::Snapshot {
        AccountSnapshot {
            owner: self.owner.clone(),
            balance: self.balance,
        }
    }

    fn from_snapshot(id: Uuid, version: i64, state: Self::Snapshot) -> Self {
        Self {
            id,
            version,
            owner: state.owner,
            balance: state.balance,
            uncommitted_events: Vec::new(),
        }
    }
}
