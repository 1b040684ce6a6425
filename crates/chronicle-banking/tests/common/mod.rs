//! In-memory wiring of the banking domain onto the engine.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chronicle_banking::application::command_handlers::register_account_commands;
use chronicle_banking::application::query_handlers::{AccountView, get_account_by_id};
use chronicle_banking::application::saga_handlers::register_money_transfer_saga;
use chronicle_banking::domain::aggregates::Account;
use chronicle_banking::domain::commands::{DepositMoney, OpenAccount};
use chronicle_banking::domain::sagas::{MoneyTransferSaga, MoneyTransferState};
use chronicle_core::clock::SharedClock;
use chronicle_core::command::Command;
use chronicle_core::config::{AggregateStoreSettings, ProcessorSettings, SagaStoreSettings};
use chronicle_core::sequential::SequentialIdGenerator;
use chronicle_event_store::{InMemoryEventStore, InMemorySagaRepository, InMemorySnapshotStore};
use chronicle_runtime::{
    AggregateStore, CachedAggregateStore, CachedSagaStore, CommandPublisher,
    EventPublisher, EventSourcedAggregateStore, HandlerRegistry, HookedAggregateStore,
    HookedSagaStore, PersistentSagaStore, Processor, PublishCommandsHook, PublishEventsHook,
    SagaStore, TimeoutScheduler, message_bus,
};
use chronicle_test_support::{ManualClock, init_tracing};
use uuid::Uuid;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap()
}

pub struct Bank {
    pub clock: ManualClock,
    pub events: Arc<InMemoryEventStore>,
    pub accounts: Arc<dyn AggregateStore<Account>>,
    pub transfers: Arc<dyn SagaStore<MoneyTransferState>>,
    pub scheduler: Arc<TimeoutScheduler>,
    pub commands: Processor,
    pub event_processor: Processor,
    publisher: CommandPublisher,
}

impl Bank {
    pub fn new() -> Self {
        init_tracing();
        let clock = ManualClock::new(start());
        let shared_clock: SharedClock = Arc::new(clock.clone());
        let ids = Arc::new(SequentialIdGenerator::default());
        let settings = ProcessorSettings {
            bounded_capacity: 256,
            maximum_concurrency_level: 4,
            retry_timeout: Duration::from_secs(2),
            save_retry_timeout: Duration::from_secs(2),
            transient_retry_delay: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(2),
        };
        let (command_sender, command_receiver) = message_bus(settings.bounded_capacity);
        let (event_sender, event_receiver) = message_bus(settings.bounded_capacity);
        let command_publisher =
            CommandPublisher::new(command_sender.clone(), Arc::clone(&ids), Arc::clone(&shared_clock));
        let event_publisher = EventPublisher::new(event_sender.clone(), Arc::clone(&shared_clock));

        let events = Arc::new(InMemoryEventStore::default());
        let aggregate_settings = AggregateStoreSettings {
            snapshot_interval: 5,
            ..AggregateStoreSettings::default()
        };
        let base_accounts = EventSourcedAggregateStore::<Account>::new(
            events.clone(),
            Arc::new(InMemorySnapshotStore::new()),
            aggregate_settings.clone(),
            Arc::clone(&shared_clock),
        );
        let cached_accounts = CachedAggregateStore::new(
            Arc::new(base_accounts),
            aggregate_settings.cache_sliding_expiration,
        );
        let accounts: Arc<dyn AggregateStore<Account>> = Arc::new(
            HookedAggregateStore::new(Arc::new(cached_accounts)).with_hook(Arc::new(
                PublishEventsHook::<Account>::new(event_publisher.clone(), events.clone(), true),
            )),
        );

        let saga_settings = SagaStoreSettings::default();
        let repository = Arc::new(InMemorySagaRepository::new());
        let scheduler = Arc::new(TimeoutScheduler::new(
            repository.clone(),
            event_publisher,
            Arc::clone(&shared_clock),
            Arc::clone(&ids),
            &saga_settings,
        ));
        let cached_transfers = CachedSagaStore::new(
            Arc::new(PersistentSagaStore::<MoneyTransferState>::new(repository)),
            saga_settings.cache_sliding_expiration,
        );
        let transfers: Arc<dyn SagaStore<MoneyTransferState>> = Arc::new(
            HookedSagaStore::new(Arc::new(cached_transfers))
                .with_hook(Arc::new(PublishCommandsHook::<MoneyTransferState>::new(command_publisher.clone())))
                .with_hook(Arc::new(scheduler.trigger())),
        );

        let command_registry = register_account_commands(HandlerRegistry::commands(), &accounts)
            .build()
            .unwrap();
        let event_registry = register_money_transfer_saga(HandlerRegistry::events(), &transfers)
            .build()
            .unwrap();
        let commands = Processor::builder(
            "commands",
            command_registry,
            command_sender,
            command_receiver,
            &settings,
        )
        .with_clock(Arc::clone(&shared_clock))
        .start();
        let event_processor = Processor::builder(
            "events",
            event_registry,
            event_sender,
            event_receiver,
            &settings,
        )
        .with_clock(shared_clock)
        .start();

        Self {
            clock,
            events,
            accounts,
            transfers,
            scheduler,
            commands,
            event_processor,
            publisher: command_publisher,
        }
    }

    pub async fn send(&self, command: impl Command) -> Uuid {
        self.publisher.send(Arc::new(command)).await.unwrap()
    }

    /// Waits until neither bus has work left, including work one processor
    /// hands to the other.
    pub async fn settle(&self) {
        let mut quiet_rounds = 0;
        for _ in 0..1000 {
            assert!(self.commands.wait_idle(Duration::from_secs(5)).await);
            assert!(self.event_processor.wait_idle(Duration::from_secs(5)).await);
            if self.commands.pending() == 0 && self.event_processor.pending() == 0 {
                quiet_rounds += 1;
                if quiet_rounds == 3 {
                    return;
                }
            } else {
                quiet_rounds = 0;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("buses did not settle");
    }

    pub async fn open_account(&self, owner: &str, initial_deposit: i64) -> Uuid {
        let account_id = Uuid::new_v4();
        self.send(OpenAccount {
            correlation_id: Uuid::new_v4(),
            account_id,
            owner: owner.to_owned(),
        })
        .await;
        self.settle().await;
        if initial_deposit > 0 {
            self.send(DepositMoney {
                correlation_id: Uuid::new_v4(),
                account_id,
                amount: initial_deposit,
            })
            .await;
            self.settle().await;
        }
        account_id
    }

    pub async fn account(&self, account_id: Uuid) -> AccountView {
        get_account_by_id(account_id, self.accounts.as_ref()).await.unwrap()
    }

    pub async fn transfer(&self, transfer_id: Uuid) -> MoneyTransferSaga {
        self.transfers.get(transfer_id).await.unwrap().unwrap()
    }

    pub async fn shutdown(&self) {
        self.commands.shutdown().await;
        self.event_processor.shutdown().await;
    }
}
