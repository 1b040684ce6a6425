//! Event handlers driving the money-transfer saga.

use std::sync::Arc;

use chronicle_core::saga::SagaTimeout;
use chronicle_runtime::handler::HandlerContext;
use chronicle_runtime::registry::RegistryBuilder;
use chronicle_runtime::saga_handler::{SagaEventHandler, SagaTimeoutHandler, SagaTrigger};
use chronicle_runtime::saga_store::SagaStore;
use tracing::info;

use crate::domain::events::{AccountEvent, AccountEventKind};
use crate::domain::sagas::{
    MoneyTransferSaga, MoneyTransferState, on_transfer_received, on_transfer_sent,
    on_transfer_timed_out,
};

fn correlate(event: &AccountEvent) -> SagaTrigger {
    match &event.kind {
        AccountEventKind::MoneyTransferSent(transfer) => SagaTrigger::Start(transfer.transfer_id),
        AccountEventKind::MoneyTransferReceived(transfer) => {
            SagaTrigger::Continue(transfer.transfer_id)
        }
        _ => SagaTrigger::Ignore,
    }
}

/// Registers the money-transfer saga on an event registry.
#[must_use]
pub fn register_money_transfer_saga(
    registry: RegistryBuilder,
    store: &Arc<dyn SagaStore<MoneyTransferState>>,
) -> RegistryBuilder {
    registry
        .event::<AccountEvent>(Arc::new(SagaEventHandler::new(
            Arc::clone(store),
            correlate,
            |saga: &mut MoneyTransferSaga, event: &AccountEvent, ctx: &HandlerContext<'_>| {
                match &event.kind {
                    AccountEventKind::MoneyTransferSent(sent) => {
                        on_transfer_sent(saga, sent, ctx.now());
                    }
                    AccountEventKind::MoneyTransferReceived(_) => on_transfer_received(saga),
                    _ => {}
                }
                Ok(())
            },
        )))
        .event::<SagaTimeout>(Arc::new(SagaTimeoutHandler::new(
            Arc::clone(store),
            |saga: &mut MoneyTransferSaga, _ctx: &HandlerContext<'_>| {
                info!(
                    transfer_id = %saga.correlation_id(),
                    source_account_id = %saga.state.source_account_id,
                    amount = saga.state.amount,
                    "money transfer timed out, refunding"
                );
                on_transfer_timed_out(saga);
                Ok(())
            },
        )))
}
