//! Command abstractions.

use uuid::Uuid;

use crate::envelope::AsAny;

/// Trait that all commands implement.
pub trait Command: AsAny + Send + Sync + std::fmt::Debug + 'static {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;

    /// The aggregate this command targets.
    fn aggregate_id(&self) -> Uuid;
}
