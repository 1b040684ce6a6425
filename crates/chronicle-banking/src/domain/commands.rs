//! Commands for the banking context.

use chronicle_core::command::Command;
use uuid::Uuid;

/// Command to open an account.
#[derive(Debug, Clone)]
pub struct OpenAccount {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The account identifier.
    pub account_id: Uuid,
    /// Account holder name.
    pub owner: String,
}

impl Command for OpenAccount {
    fn command_type(&self) -> &'static str {
        "banking.open_account"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.account_id
    }
}

/// Command to deposit money into an account.
#[derive(Debug, Clone)]
pub struct DepositMoney {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The account identifier.
    pub account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
}

impl Command for DepositMoney {
    fn command_type(&self) -> &'static str {
        "banking.deposit_money"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.account_id
    }
}

/// Command to withdraw money from an account.
#[derive(Debug, Clone)]
pub struct WithdrawMoney {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The account identifier.
    pub account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
}

impl Command for WithdrawMoney {
    fn command_type(&self) -> &'static str {
        "banking.withdraw_money"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.account_id
    }
}

/// Command to send money from `source_account_id` to `target_account_id`.
///
/// Handled by the source account; the transfer identifier correlates the
/// whole transfer.
#[derive(Debug, Clone)]
pub struct SendMoneyTransfer {
    /// Transfer identifier.
    pub transfer_id: Uuid,
    /// Debited account.
    pub source_account_id: Uuid,
    /// Credited account.
    pub target_account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
}

impl Command for SendMoneyTransfer {
    fn command_type(&self) -> &'static str {
        "banking.send_money_transfer"
    }

    fn correlation_id(&self) -> Uuid {
        self.transfer_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.source_account_id
    }
}

/// Command to credit a sent transfer to its target account.
#[derive(Debug, Clone)]
pub struct ReceiveMoneyTransfer {
    /// Transfer identifier.
    pub transfer_id: Uuid,
    /// Debited account.
    pub source_account_id: Uuid,
    /// Credited account.
    pub target_account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
}

impl Command for ReceiveMoneyTransfer {
    fn command_type(&self) -> &'static str {
        "banking.receive_money_transfer"
    }

    fn correlation_id(&self) -> Uuid {
        self.transfer_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.target_account_id
    }
}

/// Command to give a transfer's amount back to its source account.
#[derive(Debug, Clone)]
pub struct RefundMoneyTransfer {
    /// Transfer identifier.
    pub transfer_id: Uuid,
    /// Debited account, credited back.
    pub source_account_id: Uuid,
    /// Account that never received the transfer.
    pub target_account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
}

impl Command for RefundMoneyTransfer {
    fn command_type(&self) -> &'static str {
        "banking.refund_money_transfer"
    }

    fn correlation_id(&self) -> Uuid {
        self.transfer_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.source_account_id
    }
}
