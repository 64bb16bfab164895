//! Stored records.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::id::Id;

/// One stored record: the identifier it is filed under and an opaque value.
///
/// Equality and hashing cover both fields, so two values stored under the
/// same identifier are distinct entries.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    id: Id,
    value: Bytes,
}

impl Entry {
    pub fn new(id: Id, value: impl Into<Bytes>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }

    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("value_len", &self.value.len())
            .finish()
    }
}
