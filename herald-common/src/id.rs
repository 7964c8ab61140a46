//! Entity identifiers.
//!
//! Every entity is keyed by a ULID wrapped in its own newtype so that a
//! campaign id can never be passed where a subscriber id is expected. ULIDs
//! sort lexicographically by creation time, which the store relies on for
//! FIFO ordering within a priority band.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique identifier
            #[must_use]
            pub fn generate() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Wrap an existing ULID
            #[must_use]
            pub const fn new(id: ulid::Ulid) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn ulid(&self) -> ulid::Ulid {
                self.0
            }

            /// Milliseconds since the Unix epoch encoded in the identifier
            #[must_use]
            pub const fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ulid::Ulid::from_string(s).map(Self)
            }
        }
    };
}

entity_id!(
    /// Identifier of an [`EmailQueueItem`](crate::EmailQueueItem)
    EmailId
);
entity_id!(
    /// Identifier of a [`NewsletterCampaign`](crate::NewsletterCampaign)
    CampaignId
);
entity_id!(
    /// Identifier of a [`Subscriber`](crate::Subscriber)
    SubscriberId
);
entity_id!(
    /// Identifier of a [`NewsletterDeliveryLog`](crate::NewsletterDeliveryLog)
    LogId
);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        let id = CampaignId::generate();
        let parsed: CampaignId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_garbage() {
        assert!("not-a-ulid".parse::<EmailId>().is_err());
    }
}
