use thiserror::Error;

use crate::delivery::DeliveryError;
use crate::ports::StorageError;

/// Failure of one response cycle. Anything not covered here is handled
/// inside the cycle and degrades to a fallback reply instead of an error.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("delivery failure: {0}")]
    Delivery(#[from] DeliveryError),
}
