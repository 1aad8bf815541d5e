//! Type-safe dense index wrappers.
//!
//! Users and information pieces are addressed inside the engine by dense
//! integer indices (`0..n`), assigned by the data collaborator when the
//! dataset is loaded. Per-user runtime state lives in arenas addressed by
//! these indices, so every lookup is a bounds-checked vector access rather
//! than a hash lookup on an opaque external identifier.
//!
//! The mapping to and from external identifiers is owned by the data
//! collaborator (`contagion_graph::Index`).

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a `u32` dense index with standard derives.
macro_rules! define_index {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Wrap a raw dense index.
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Return the inner `u32` value.
            pub const fn into_inner(self) -> u32 {
                self.0
            }

            /// Return the index as a `usize`, for arena addressing.
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Build an index from a `usize` position.
            ///
            /// Returns `None` if the position does not fit in a `u32`.
            pub fn from_usize(position: usize) -> Option<Self> {
                u32::try_from(position).ok().map(Self)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(idx: $name) -> Self {
                idx.0
            }
        }
    };
}

define_index! {
    /// Dense index of a user (a node of the social graph).
    UserIdx
}

define_index! {
    /// Dense index of an information piece.
    PieceIdx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_round_trip_through_usize() {
        let user = UserIdx::from_usize(7);
        assert_eq!(user, Some(UserIdx(7)));
        assert_eq!(UserIdx(7).as_usize(), 7);
    }

    #[test]
    fn oversized_position_is_rejected() {
        assert!(PieceIdx::from_usize(usize::MAX).is_none());
    }

    #[test]
    fn serializes_as_bare_integer() {
        let json = serde_json::to_string(&PieceIdx(12)).unwrap_or_default();
        assert_eq!(json, "12");
    }

    #[test]
    fn display_shows_raw_index() {
        assert_eq!(UserIdx(3).to_string(), "3");
    }
}
