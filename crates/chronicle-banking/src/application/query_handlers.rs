//! Query handlers for the banking context.
//!
//! Queries read accounts through the aggregate store and return read-only
//! view DTOs.

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::error::DomainError;
use chronicle_runtime::aggregate_store::AggregateStore;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::Account;

/// Read-only view of an account aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountView {
    /// The account identifier.
    pub account_id: Uuid,
    /// Account holder name.
    pub owner: String,
    /// Balance in minor units.
    pub balance: i64,
    /// Current version (event count).
    pub version: i64,
}

/// Retrieves an account by its aggregate ID.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the account has no events.
/// Returns other `DomainError`s from loading the account.
pub async fn get_account_by_id(
    account_id: Uuid,
    store: &dyn AggregateStore<Account>,
) -> Result<AccountView, DomainError> {
    let account = store.get(account_id).await?;
    if account.version() == 0 {
        return Err(DomainError::AggregateNotFound(account_id));
    }
    Ok(AccountView {
        account_id,
        owner: account.owner().unwrap_or_default().to_owned(),
        balance: account.balance(),
        version: account.version(),
    })
}
