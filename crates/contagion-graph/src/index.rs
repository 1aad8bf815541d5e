//! Bijective mapping between opaque external identifiers and dense indices.

use std::collections::HashMap;

use crate::error::DataError;

/// Maps external string identifiers to dense positions `0..len` and back.
///
/// Positions are assigned in insertion order and never reused.
#[derive(Debug, Clone, Default)]
pub struct Index {
    /// Position -> external id.
    ids: Vec<String>,
    /// External id -> position.
    positions: HashMap<String, u32>,
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new identifier and return its position.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::DuplicateId`] if the id is already registered,
    /// or [`DataError::IndexOverflow`] if the index is full.
    pub fn insert(&mut self, kind: &'static str, id: &str) -> Result<u32, DataError> {
        if self.positions.contains_key(id) {
            return Err(DataError::DuplicateId {
                kind,
                id: id.to_owned(),
            });
        }
        let position = u32::try_from(self.ids.len())
            .ok()
            .ok_or(DataError::IndexOverflow(kind))?;
        self.ids.push(id.to_owned());
        self.positions.insert(id.to_owned(), position);
        Ok(position)
    }

    /// Position of an external id.
    pub fn position(&self, id: &str) -> Option<u32> {
        self.positions.get(id).copied()
    }

    /// External id at a position.
    pub fn id(&self, position: u32) -> Option<&str> {
        self.ids.get(position as usize).map(String::as_str)
    }

    /// Number of registered ids.
    pub const fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the index is empty.
    pub const fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
