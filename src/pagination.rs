//! Batch windows over collections produced by a traversal.
//!
//! `batch_size > 0` selects `[start_index, start_index + batch_size)` clipped to the
//! collection, `batch_size < 0` selects everything, and `batch_size == 0` selects
//! nothing. A start past the end yields an empty batch, never an error. `count` is
//! always the size of the whole collection.
//!
//! Order is whatever the store produced; nothing here sorts.

use anyhow::anyhow;
use serde::Serialize;

use crate::error::{LibError, Result};
use crate::models::BatchQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchWindow {
    pub start_index: i64,
    pub batch_size: i64,
}

/// Slice bounds derived from a window, as rendered into a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceBounds {
    All,
    Range { start: i64, end: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub count: usize,
    pub batch: Vec<T>,
}

impl BatchWindow {
    pub fn new(start_index: i64, batch_size: i64) -> Result<Self> {
        if start_index < 0 {
            return Err(LibError::invalid(
                "start_index must not be negative",
                anyhow!("negative start_index {}", start_index),
            ));
        }
        Ok(Self {
            start_index,
            batch_size,
        })
    }

    pub fn from_query(query: &BatchQuery, default_batch_size: i64) -> Result<Self> {
        Self::new(
            query.start_index.unwrap_or(0),
            query.batch_size.unwrap_or(default_batch_size),
        )
    }

    pub const fn is_unbounded(&self) -> bool {
        self.batch_size < 0
    }

    pub fn bounds(&self) -> SliceBounds {
        if self.is_unbounded() {
            SliceBounds::All
        } else {
            SliceBounds::Range {
                start: self.start_index,
                end: self.start_index.saturating_add(self.batch_size),
            }
        }
    }
}

pub fn paginate<T>(items: Vec<T>, window: &BatchWindow) -> Page<T> {
    let count = items.len();
    let batch = match window.bounds() {
        SliceBounds::All => items,
        SliceBounds::Range { start, end } => {
            let start = clamp_index(start, count);
            let end = clamp_index(end, count);
            items
                .into_iter()
                .skip(start)
                .take(end.saturating_sub(start))
                .collect()
        }
    };

    Page { count, batch }
}

fn clamp_index(index: i64, len: usize) -> usize {
    usize::try_from(index).map_or(0, |index| index.min(len))
}
