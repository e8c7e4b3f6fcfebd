//! Tri-state outcome mapping.
//!
//! Commit processing ends in one of three ways. The mapping from the
//! engine's [`CommitResult`] is total and keeps the two rejection kinds
//! apart, because the host reacts to them differently: a hard failure is
//! reported to the voice gateway, a soft ignore is dropped silently.

use dave_core::CommitResult;

/// Why a message was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectType {
    /// Message is invalid.
    Failed,
    /// Message is valid but inapplicable.
    Ignored,
}

/// Host-visible result of commit processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Message applied; carries the engine value unchanged.
    Payload(T),
    /// Message invalid; session state unaffected.
    HardFailure,
    /// Message valid but not applicable (stale epoch, own echo).
    SoftIgnore,
}

impl<T> Outcome<T> {
    /// Maps an engine result.
    pub fn map_native(result: CommitResult<T>) -> Self {
        match result {
            CommitResult::Applied(value) => Self::Payload(value),
            CommitResult::Failed => Self::HardFailure,
            CommitResult::Ignored => Self::SoftIgnore,
        }
    }

    /// Whether the message was applied.
    pub fn is_payload(&self) -> bool {
        matches!(self, Self::Payload(_))
    }

    /// Whether the message was invalid.
    pub fn is_hard_failure(&self) -> bool {
        matches!(self, Self::HardFailure)
    }

    /// Whether the message was dropped as inapplicable.
    pub fn is_soft_ignore(&self) -> bool {
        matches!(self, Self::SoftIgnore)
    }

    /// The payload, if any.
    pub fn payload(self) -> Option<T> {
        match self {
            Self::Payload(value) => Some(value),
            Self::HardFailure | Self::SoftIgnore => None,
        }
    }

    /// Rejection kind, if the message was not applied.
    pub fn reject_type(&self) -> Option<RejectType> {
        match self {
            Self::Payload(_) => None,
            Self::HardFailure => Some(RejectType::Failed),
            Self::SoftIgnore => Some(RejectType::Ignored),
        }
    }

    /// Converts into a `Result` keyed by rejection kind.
    pub fn into_result(self) -> Result<T, RejectType> {
        match self {
            Self::Payload(value) => Ok(value),
            Self::HardFailure => Err(RejectType::Failed),
            Self::SoftIgnore => Err(RejectType::Ignored),
        }
    }
}

impl<T> From<CommitResult<T>> for Outcome<T> {
    fn from(result: CommitResult<T>) -> Self {
        Self::map_native(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps() {
        assert_eq!(Outcome::map_native(CommitResult::Applied(5)), Outcome::Payload(5));
        assert_eq!(Outcome::<u8>::map_native(CommitResult::Failed), Outcome::HardFailure);
        assert_eq!(Outcome::<u8>::map_native(CommitResult::Ignored), Outcome::SoftIgnore);
    }

    #[test]
    fn rejections_stay_distinct() {
        let failed: Outcome<()> = CommitResult::Failed.into();
        let ignored: Outcome<()> = CommitResult::Ignored.into();

        assert_eq!(failed.reject_type(), Some(RejectType::Failed));
        assert_eq!(ignored.reject_type(), Some(RejectType::Ignored));
        assert_ne!(failed.into_result(), ignored.into_result());
    }
}
