//! Strong, zero-cost handles for forest entities.
//!
//! Elements, vertices, and clusters are addressed by newtypes around
//! `NonZeroU32`; 0 is reserved as the invalid/sentinel value so `Option<Id>`
//! stays a single word. Conversions to storage indices are explicit
//! (`index()` subtracts the sentinel offset), keeping raw `usize` arithmetic
//! out of the rest of the crate.

use crate::error::MeshForgeError;
use std::{fmt, num::NonZeroU32};

/// Owning process id in the SPMD model.
pub type Rank = usize;

macro_rules! forest_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Build from a raw non-zero value; `Err` on 0.
            #[inline]
            pub fn new(raw: u32) -> Result<Self, MeshForgeError> {
                NonZeroU32::new(raw)
                    .map(Self)
                    .ok_or(MeshForgeError::InvalidId)
            }

            /// Build from a zero-based storage index.
            #[inline]
            pub fn from_index(idx: usize) -> Self {
                // idx + 1 never wraps for any realistic forest size
                Self(NonZeroU32::new(idx as u32 + 1).expect("index + 1 is non-zero"))
            }

            /// Raw non-zero value.
            #[inline]
            pub const fn get(self) -> u32 {
                self.0.get()
            }

            /// Zero-based storage index.
            #[inline]
            pub const fn index(self) -> usize {
                (self.0.get() - 1) as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.get()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.get())
            }
        }
    };
}

forest_id! {
    /// Handle for an element in the refinement forest.
    ElementId
}

forest_id! {
    /// Handle for a geometric vertex.
    VertexId
}

forest_id! {
    /// Handle for a transient load-balancing cluster (local index, pass-scoped).
    ClusterId
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    // Option<Id> must stay a single u32 thanks to the niche.
    assert_eq_size!(ElementId, u32);
    assert_eq_size!(Option<ElementId>, u32);
    assert_eq_size!(VertexId, u32);
    assert_eq_size!(ClusterId, u32);
}
