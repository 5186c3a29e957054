//! Splitting the link ID space into contiguous ranges.
//!
//! Workers each take one `[from, to)` range and pass it to
//! [`Graph::links`](crate::Graph::links) / [`Graph::edges`](crate::Graph::edges).
//! Because the ranges are contiguous and non-overlapping, the workers
//! together visit every link exactly once without talking to each other.
//!
//! Boundaries are computed on the 128-bit integer value of the UUID, whose
//! ordering matches the ordering of the canonical string form.

use crate::error::{GraphError, Result};
use crate::types::LinkId;
use uuid::Uuid;

/// The largest UUID. Never produced by v4 generation, so `[nil, MAX)`
/// covers every ID a backend assigns.
pub const MAX_ID: Uuid = Uuid::from_u128(u128::MAX);

/// A `[start, end)` slice of the ID space divided into equal partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    start: LinkId,
    end: LinkId,
    /// `len() + 1` ascending boundaries; partition `i` is
    /// `[boundaries[i], boundaries[i + 1])`.
    boundaries: Vec<LinkId>,
}

impl Range {
    /// Divide `[start, end)` into `partitions` contiguous ranges. The last
    /// partition absorbs the remainder of the division.
    pub fn new(start: LinkId, end: LinkId, partitions: usize) -> Result<Self> {
        if partitions == 0 {
            return Err(GraphError::Partition(
                "number of partitions must be at least 1".to_string(),
            ));
        }
        if start >= end {
            return Err(GraphError::Partition(format!(
                "range start {} must be before end {}",
                start, end
            )));
        }

        let lo = start.as_u128();
        let hi = end.as_u128();
        let span = hi - lo;
        let count = partitions as u128;
        if count > span {
            return Err(GraphError::Partition(format!(
                "cannot split a range of {} IDs into {} partitions",
                span, partitions
            )));
        }

        let step = span / count;
        let mut boundaries: Vec<LinkId> = (0..count)
            .map(|i| Uuid::from_u128(lo + i * step))
            .collect();
        boundaries.push(end);

        Ok(Self {
            start,
            end,
            boundaries,
        })
    }

    /// Divide the whole ID space `[nil, MAX_ID)`.
    pub fn full(partitions: usize) -> Result<Self> {
        Self::new(Uuid::nil(), MAX_ID, partitions)
    }

    pub fn start(&self) -> LinkId {
        self.start
    }

    pub fn end(&self) -> LinkId {
        self.end
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Half-open bounds of partition `index`.
    pub fn extents(&self, index: usize) -> Result<(LinkId, LinkId)> {
        if index >= self.len() {
            return Err(GraphError::Partition(format!(
                "partition index {} out of range (0..{})",
                index,
                self.len()
            )));
        }
        Ok((self.boundaries[index], self.boundaries[index + 1]))
    }

    /// Index of the partition containing `id`.
    pub fn partition_for(&self, id: LinkId) -> Result<usize> {
        if id < self.start || id >= self.end {
            return Err(GraphError::Partition(format!(
                "id {} is outside [{}, {})",
                id, self.start, self.end
            )));
        }
        // First boundary strictly greater than `id`, minus one.
        let upper = self.boundaries.partition_point(|b| *b <= id);
        Ok(upper - 1)
    }

    /// All partitions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (LinkId, LinkId)> + '_ {
        self.boundaries.windows(2).map(|w| (w[0], w[1]))
    }
}
