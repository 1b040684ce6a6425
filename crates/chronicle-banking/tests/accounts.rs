mod common;

use chronicle_banking::domain::commands::{DepositMoney, WithdrawMoney};
use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::error::DomainError;
use chronicle_core::repository::EventStore;
use chronicle_runtime::AggregateStore;
use common::Bank;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_open_account_produces_one_event_at_version_one() {
    // Arrange
    let bank = Bank::new();

    // Act
    let account_id = bank.open_account("Ada", 0).await;

    // Assert
    let view = bank.account(account_id).await;
    assert_eq!(view.version, 1);
    assert_eq!(view.balance, 0);
    assert_eq!(view.owner, "Ada");
    assert_eq!(bank.events.stream_version(account_id), 1);
    assert!(bank.events.undispatched().await.unwrap().is_empty());
    bank.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stale_save_conflicts_then_succeeds_after_reload() {
    // Arrange
    let bank = Bank::new();
    let account_id = bank.open_account("Ada", 0).await;
    let clock = bank.clock.clone();
    let mut first = bank.accounts.get(account_id).await.unwrap();
    let mut second = bank.accounts.get(account_id).await.unwrap();
    first.deposit(100, Uuid::new_v4(), &clock).unwrap();
    second.deposit(50, Uuid::new_v4(), &clock).unwrap();
    bank.accounts.save(first, Uuid::new_v4()).await.unwrap();

    // Act
    let conflict = bank.accounts.save(second, Uuid::new_v4()).await;
    let mut reloaded = bank.accounts.get(account_id).await.unwrap();
    reloaded.deposit(50, Uuid::new_v4(), &clock).unwrap();
    let retried = bank.accounts.save(reloaded, Uuid::new_v4()).await.unwrap();

    // Assert
    assert!(matches!(
        conflict,
        Err(DomainError::ConcurrencyConflict {
            expected: 1,
            actual: 2,
            ..
        })
    ));
    assert_eq!(retried.version, 3);
    assert_eq!(bank.account(account_id).await.balance, 150);
    bank.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_both_land() {
    // Arrange
    let bank = Bank::new();
    let account_id = bank.open_account("Ada", 0).await;

    // Act
    let (a, b) = tokio::join!(
        bank.send(DepositMoney {
            correlation_id: Uuid::new_v4(),
            account_id,
            amount: 100,
        }),
        bank.send(DepositMoney {
            correlation_id: Uuid::new_v4(),
            account_id,
            amount: 250,
        }),
    );
    bank.settle().await;

    // Assert
    assert_ne!(a, b);
    let view = bank.account(account_id).await;
    assert_eq!(view.version, 3);
    assert_eq!(view.balance, 350);
    assert_eq!(bank.commands.stats().persisted(), 3);
    assert_eq!(bank.commands.stats().failed(), 0);
    bank.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overdraft_is_rejected_without_retry() {
    // Arrange
    let bank = Bank::new();
    let account_id = bank.open_account("Ada", 40).await;

    // Act
    bank.send(WithdrawMoney {
        correlation_id: Uuid::new_v4(),
        account_id,
        amount: 41,
    })
    .await;
    bank.settle().await;

    // Assert
    assert_eq!(bank.commands.stats().failed(), 1);
    assert_eq!(bank.commands.stats().retries(), 0);
    let account = bank.accounts.get(account_id).await.unwrap();
    assert_eq!(account.version(), 2);
    assert_eq!(account.balance(), 40);
    bank.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_deposits_on_one_account_all_apply() {
    // Arrange
    let bank = Bank::new();
    let account_id = bank.open_account("Ada", 0).await;

    // Act
    for amount in 1..=12 {
        bank.send(DepositMoney {
            correlation_id: Uuid::new_v4(),
            account_id,
            amount,
        })
        .await;
    }
    bank.settle().await;

    // Assert
    let view = bank.account(account_id).await;
    assert_eq!(view.version, 13);
    assert_eq!(view.balance, (1..=12).sum::<i64>());
    bank.shutdown().await;
}
