mod iterator;

pub use iterator::{EdgeIterator, GraphIterator, Items, LinkIterator};

use crate::error::Result;
use crate::types::{Edge, Link, LinkId};
use chrono::{DateTime, Utc};

/// Storage contract for the crawler's link graph.
///
/// Every backend must be interchangeable behind this trait: same merge
/// rules, same scan membership and ordering, same error kinds.
///
/// ID ranges are half-open `[from, to)` and compare IDs by their canonical
/// string encoding. For UUIDs that is the same as comparing their bytes,
/// which is what `Uuid`'s `Ord` does, so backends compare `Uuid`s directly.
/// A range with `from >= to` is empty.
pub trait Graph: Send + Sync {
    /// Insert a link, or merge it into the existing link with the same URL.
    ///
    /// On return `link` holds the stored ID and `retrieved_at`. For an
    /// existing URL the stored `retrieved_at` becomes the later of the two.
    fn upsert_link(&self, link: &mut Link) -> Result<()>;

    /// Look up a link by ID. Fails with `NotFound` if there is none.
    fn find_link(&self, id: LinkId) -> Result<Link>;

    /// Insert an edge, or refresh the existing edge with the same
    /// `(src, dst)` pair.
    ///
    /// Fails with `UnknownEdgeLinks` if either endpoint is missing. On
    /// return `edge` holds the stored ID and `updated_at`.
    fn upsert_edge(&self, edge: &mut Edge) -> Result<()>;

    /// Delete every edge leaving `from` that was last updated strictly
    /// before `updated_before`.
    fn remove_stale_edges(&self, from: LinkId, updated_before: DateTime<Utc>) -> Result<()>;

    /// Links with IDs in `[from, to)` retrieved strictly before
    /// `retrieved_before`, in ascending ID order.
    fn links(
        &self,
        from: LinkId,
        to: LinkId,
        retrieved_before: DateTime<Utc>,
    ) -> Result<LinkIterator>;

    /// Edges whose source ID is in `[from, to)` and updated strictly before
    /// `updated_before`, in ascending `(src, dst)` order.
    fn edges(
        &self,
        from: LinkId,
        to: LinkId,
        updated_before: DateTime<Utc>,
    ) -> Result<EdgeIterator>;
}

impl<G: Graph + ?Sized> Graph for std::sync::Arc<G> {
    fn upsert_link(&self, link: &mut Link) -> Result<()> {
        (**self).upsert_link(link)
    }

    fn find_link(&self, id: LinkId) -> Result<Link> {
        (**self).find_link(id)
    }

    fn upsert_edge(&self, edge: &mut Edge) -> Result<()> {
        (**self).upsert_edge(edge)
    }

    fn remove_stale_edges(&self, from: LinkId, updated_before: DateTime<Utc>) -> Result<()> {
        (**self).remove_stale_edges(from, updated_before)
    }

    fn links(
        &self,
        from: LinkId,
        to: LinkId,
        retrieved_before: DateTime<Utc>,
    ) -> Result<LinkIterator> {
        (**self).links(from, to, retrieved_before)
    }

    fn edges(
        &self,
        from: LinkId,
        to: LinkId,
        updated_before: DateTime<Utc>,
    ) -> Result<EdgeIterator> {
        (**self).edges(from, to, updated_before)
    }
}

impl<G: Graph + ?Sized> Graph for Box<G> {
    fn upsert_link(&self, link: &mut Link) -> Result<()> {
        (**self).upsert_link(link)
    }

    fn find_link(&self, id: LinkId) -> Result<Link> {
        (**self).find_link(id)
    }

    fn upsert_edge(&self, edge: &mut Edge) -> Result<()> {
        (**self).upsert_edge(edge)
    }

    fn remove_stale_edges(&self, from: LinkId, updated_before: DateTime<Utc>) -> Result<()> {
        (**self).remove_stale_edges(from, updated_before)
    }

    fn links(
        &self,
        from: LinkId,
        to: LinkId,
        retrieved_before: DateTime<Utc>,
    ) -> Result<LinkIterator> {
        (**self).links(from, to, retrieved_before)
    }

    fn edges(
        &self,
        from: LinkId,
        to: LinkId,
        updated_before: DateTime<Utc>,
    ) -> Result<EdgeIterator> {
        (**self).edges(from, to, updated_before)
    }
}

#[cfg(test)]
pub(crate) mod suite;
