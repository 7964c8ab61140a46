//! Error types for the herald-store crate.

use herald_common::{ErrorCode, HeraldError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    /// A record with the same identity or unique key is already stored.
    #[error("{resource} {id} already exists")]
    AlreadyExists { resource: &'static str, id: String },

    /// The backend refused the write because it is full.
    #[error("Memory store capacity exceeded: {used}/{capacity} emails")]
    CapacityExceeded { used: usize, capacity: usize },
}

impl StoreError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn already_exists(resource: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            resource,
            id: id.to_string(),
        }
    }
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for HeraldError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound { resource, id } => Self::not_found(resource, id),
            StoreError::AlreadyExists { resource, id } => {
                Self::new(ErrorCode::InvalidState, err.to_string())
                    .with_detail("resource", resource)
                    .with_detail("id", id)
            }
            StoreError::CapacityExceeded { used, capacity } => Self::storage(err.to_string())
                .with_detail("used", used)
                .with_detail("capacity", capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_code() {
        let err: HeraldError = StoreError::not_found("campaign", "01J").into();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.detail("resource"), Some("campaign"));
    }

    #[test]
    fn duplicate_is_invalid_state() {
        let err: HeraldError = StoreError::already_exists("delivery log", "c/s").into();
        assert_eq!(err.code, ErrorCode::InvalidState);
        assert!(err.message.contains("already exists"));
    }

    #[test]
    fn capacity_is_storage() {
        let err: HeraldError = StoreError::CapacityExceeded {
            used: 2,
            capacity: 2,
        }
        .into();
        assert_eq!(err.code, ErrorCode::Storage);
        assert!(err.to_string().contains("capacity exceeded"));
    }
}
