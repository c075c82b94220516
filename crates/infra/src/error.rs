use thiserror::Error;

use stockroom_core::DomainError;

use crate::store::StoreError;

/// Error returned by every warehouse command.
///
/// `Domain` errors are business-rule violations and are never retried. `Store`
/// errors are infrastructure failures; they abort the command, not the
/// process. In every case the command's transaction has been rolled back.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(StoreError),

    #[error("command cancelled")]
    Cancelled,

    #[error("command deadline exceeded")]
    DeadlineExceeded,
}

impl CommandError {
    /// True for errors the caller should surface as a client error.
    pub fn is_business_rule(&self) -> bool {
        matches!(self, CommandError::Domain(_))
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            CommandError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Unique violations on known constraints mean a concurrent command won the
/// race for the same number or name; report them like the pre-checked case.
impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        if let StoreError::UniqueViolation { constraint } = &err {
            let translated = match constraint.as_str() {
                "receipts_number_key" => Some(DomainError::duplicate_number("receipt")),
                "shipments_number_key" => Some(DomainError::duplicate_number("shipment")),
                "resources_name_key" => Some(DomainError::duplicate_name("resource")),
                "units_name_key" => Some(DomainError::duplicate_name("unit of measure")),
                "clients_name_key" => Some(DomainError::duplicate_name("client")),
                _ => None,
            };
            if let Some(domain) = translated {
                return CommandError::Domain(domain);
            }
        }
        CommandError::Store(err)
    }
}
