//! Identifiers for media sources and their source buffers.
//!
//! A media source owns its buffers outright. A buffer points back at its
//! owner only through a [`MediaSourceId`], and callers address a buffer by
//! its [`SourceBufferId`]. Both ids tag every event on the bus and appear in
//! log lines, so they format as plain UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! handle_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_id! {
    /// Owner of a set of source buffers; the source tag of every event.
    MediaSourceId
}

handle_id! {
    /// Key of one buffer within its media source.
    SourceBufferId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(MediaSourceId::new(), MediaSourceId::new());
        assert_ne!(SourceBufferId::new(), SourceBufferId::new());
    }

    #[test]
    fn test_id_display_matches_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(SourceBufferId::from(uuid).to_string(), uuid.to_string());
        assert_eq!(MediaSourceId::from(uuid).to_string(), uuid.to_string());
    }

    #[test]
    fn test_event_tag_serializes_as_bare_uuid() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&MediaSourceId::from(uuid)).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}
