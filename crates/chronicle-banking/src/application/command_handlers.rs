//! Command handlers for the banking context.
//!
//! Each command loads the account it targets, runs the matching domain
//! method and saves the result under the command's message id.

use std::sync::Arc;

use chronicle_runtime::aggregate_store::AggregateStore;
use chronicle_runtime::handler::{AggregateCommandHandler, HandlerContext};
use chronicle_runtime::registry::RegistryBuilder;

use crate::domain::aggregates::Account;
use crate::domain::commands::{
    DepositMoney, OpenAccount, ReceiveMoneyTransfer, RefundMoneyTransfer, SendMoneyTransfer,
    WithdrawMoney,
};

/// Registers the account command handlers on a command registry.
#[must_use]
pub fn register_account_commands(
    registry: RegistryBuilder,
    store: &Arc<dyn AggregateStore<Account>>,
) -> RegistryBuilder {
    registry
        .command::<OpenAccount>(Arc::new(AggregateCommandHandler::new(
            Arc::clone(store),
            |account: &mut Account, command: &OpenAccount, ctx: &HandlerContext<'_>| {
                account.open(&command.owner, command.correlation_id, ctx.clock())
            },
        )))
        .command::<DepositMoney>(Arc::new(AggregateCommandHandler::new(
            Arc::clone(store),
            |account: &mut Account, command: &DepositMoney, ctx: &HandlerContext<'_>| {
                account.deposit(command.amount, command.correlation_id, ctx.clock())
            },
        )))
        .command::<WithdrawMoney>(Arc::new(AggregateCommandHandler::new(
            Arc::clone(store),
            |account: &mut Account, command: &WithdrawMoney, ctx: &HandlerContext<'_>| {
                account.withdraw(command.amount, command.correlation_id, ctx.clock())
            },
        )))
        .command::<SendMoneyTransfer>(Arc::new(AggregateCommandHandler::new(
            Arc::clone(store),
            |account: &mut Account, command: &SendMoneyTransfer, ctx: &HandlerContext<'_>| {
                account.send_transfer(
                    command.transfer_id,
                    command.target_account_id,
                    command.amount,
                    ctx.clock(),
                )
            },
        )))
        .command::<ReceiveMoneyTransfer>(Arc::new(AggregateCommandHandler::new(
            Arc::clone(store),
            |account: &mut Account, command: &ReceiveMoneyTransfer, ctx: &HandlerContext<'_>| {
                account.receive_transfer(
                    command.transfer_id,
                    command.source_account_id,
                    command.amount,
                    ctx.clock(),
                )
            },
        )))
        .command::<RefundMoneyTransfer>(Arc::new(AggregateCommandHandler::new(
            Arc::clone(store),
            |account: &mut Account, command: &RefundMoneyTransfer, ctx: &HandlerContext<'_>| {
                account.refund_transfer(
                    command.transfer_id,
                    command.target_account_id,
                    command.amount,
                    ctx.clock(),
                )
            },
        )))
}
