use crate::error::{BackendError, GraphError, Result, WithOp};
use crate::graph::{EdgeIterator, Graph, GraphIterator, LinkIterator};
use crate::types::{Edge, EdgeId, Link, LinkId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

type IdSource = Arc<dyn Fn() -> Uuid + Send + Sync>;

/// Everything behind the graph lock. All four maps change together
/// under one write guard.
#[derive(Default)]
struct State {
    links: BTreeMap<LinkId, Link>,
    edges: HashMap<EdgeId, Edge>,

    /// url → link id
    link_url_index: HashMap<String, LinkId>,

    /// source link id → outgoing edge ids, in insertion order
    link_edge_map: BTreeMap<LinkId, Vec<EdgeId>>,
}

/// In-memory link graph, safe to share between threads.
///
/// Cloning is cheap and yields a handle onto the same graph.
#[derive(Clone)]
pub struct InMemoryGraph {
    state: Arc<RwLock<State>>,
    new_id: IdSource,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::with_id_source(Uuid::new_v4)
    }

    /// Use a custom ID generator. IDs it returns that are already taken
    /// are discarded and it is asked again.
    pub(crate) fn with_id_source<F>(source: F) -> Self
    where
        F: Fn() -> Uuid + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            new_id: Arc::new(source),
        }
    }

    fn read(&self, op: &'static str) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| BackendError::LockPoisoned)
            .op(op)
    }

    fn write(&self, op: &'static str) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| BackendError::LockPoisoned)
            .op(op)
    }

    /// Draw IDs until one is free according to `taken`.
    fn fresh_id(&self, taken: impl Fn(&Uuid) -> bool) -> Uuid {
        loop {
            let id = (self.new_id)();
            if !id.is_nil() && !taken(&id) {
                return id;
            }
            log::debug!("generated id {} already taken, retrying", id);
        }
    }
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph for InMemoryGraph {
    fn upsert_link(&self, link: &mut Link) -> Result<()> {
        let mut guard = self.write("upsert link")?;
        let state = &mut *guard;

        let existing_id = state.link_url_index.get(&link.url).copied();
        if let Some(existing) = existing_id.and_then(|id| state.links.get_mut(&id)) {
            if link.retrieved_at > existing.retrieved_at {
                existing.retrieved_at = link.retrieved_at;
            }
            link.id = existing.id;
            link.retrieved_at = existing.retrieved_at;
            return Ok(());
        }

        link.id = self.fresh_id(|id| state.links.contains_key(id));
        state.link_url_index.insert(link.url.clone(), link.id);
        state.links.insert(link.id, link.clone());
        log::debug!("inserted link {} ({})", link.id, link.url);
        Ok(())
    }

    fn find_link(&self, id: LinkId) -> Result<Link> {
        let state = self.read("find link")?;
        state.links.get(&id).cloned().ok_or(GraphError::NotFound(id))
    }

    fn upsert_edge(&self, edge: &mut Edge) -> Result<()> {
        let mut guard = self.write("upsert edge")?;
        let state = &mut *guard;

        if !state.links.contains_key(&edge.src) || !state.links.contains_key(&edge.dst) {
            return Err(GraphError::UnknownEdgeLinks {
                src: edge.src,
                dst: edge.dst,
            });
        }

        let now = Utc::now();
        if let Some(outgoing) = state.link_edge_map.get(&edge.src) {
            for edge_id in outgoing {
                if let Some(existing) = state.edges.get_mut(edge_id) {
                    if existing.dst == edge.dst {
                        existing.updated_at = existing.updated_at.max(now);
                        *edge = existing.clone();
                        return Ok(());
                    }
                }
            }
        }

        edge.id = self.fresh_id(|id| state.edges.contains_key(id));
        edge.updated_at = now;
        state.edges.insert(edge.id, edge.clone());
        state.link_edge_map.entry(edge.src).or_default().push(edge.id);
        log::debug!("inserted edge {} ({} -> {})", edge.id, edge.src, edge.dst);
        Ok(())
    }

    fn remove_stale_edges(&self, from: LinkId, updated_before: DateTime<Utc>) -> Result<()> {
        let mut guard = self.write("remove stale edges")?;
        let state = &mut *guard;

        let Some(outgoing) = state.link_edge_map.get_mut(&from) else {
            return Ok(());
        };

        let edges = &mut state.edges;
        let before = outgoing.len();
        outgoing.retain(|edge_id| {
            let stale = edges
                .get(edge_id)
                .map_or(true, |e| e.updated_at < updated_before);
            if stale {
                edges.remove(edge_id);
            }
            !stale
        });

        let removed = before - outgoing.len();
        if outgoing.is_empty() {
            state.link_edge_map.remove(&from);
        }
        if removed > 0 {
            log::debug!("removed {} stale edges from {}", removed, from);
        }
        Ok(())
    }

    fn links(
        &self,
        from: LinkId,
        to: LinkId,
        retrieved_before: DateTime<Utc>,
    ) -> Result<LinkIterator> {
        let ids: Vec<LinkId> = if from < to {
            let state = self.read("links")?;
            state
                .links
                .range(from..to)
                .filter(|(_, link)| link.retrieved_at < retrieved_before)
                .map(|(id, _)| *id)
                .collect()
        } else {
            Vec::new()
        };

        Ok(Box::new(SnapshotIterator::new(
            self.state.clone(),
            ids,
            "links",
            |state, id| state.links.get(id).cloned(),
        )))
    }

    fn edges(
        &self,
        from: LinkId,
        to: LinkId,
        updated_before: DateTime<Utc>,
    ) -> Result<EdgeIterator> {
        let mut ids = Vec::new();
        if from < to {
            let state = self.read("edges")?;
            for (_, outgoing) in state.link_edge_map.range(from..to) {
                let mut matched: Vec<&Edge> = outgoing
                    .iter()
                    .filter_map(|edge_id| state.edges.get(edge_id))
                    .filter(|edge| edge.updated_at < updated_before)
                    .collect();
                matched.sort_by_key(|edge| edge.dst);
                ids.extend(matched.into_iter().map(|edge| edge.id));
            }
        }

        Ok(Box::new(SnapshotIterator::new(
            self.state.clone(),
            ids,
            "edges",
            |state, id| state.edges.get(id).cloned(),
        )))
    }
}

/// Range-scan result for the in-memory graph.
///
/// Membership is fixed when the scan is taken: only the matching IDs are
/// recorded. Each `advance` re-takes the read lock and clones the record,
/// so the caller sees field values as of that moment. Edges evicted after
/// the scan started are skipped.
struct SnapshotIterator<T> {
    state: Option<Arc<RwLock<State>>>,
    ids: std::vec::IntoIter<Uuid>,
    lookup: fn(&State, &Uuid) -> Option<T>,
    current: Option<T>,
    error: Option<GraphError>,
    op: &'static str,
}

impl<T> SnapshotIterator<T> {
    fn new(
        state: Arc<RwLock<State>>,
        ids: Vec<Uuid>,
        op: &'static str,
        lookup: fn(&State, &Uuid) -> Option<T>,
    ) -> Self {
        Self {
            state: Some(state),
            ids: ids.into_iter(),
            lookup,
            current: None,
            error: None,
            op,
        }
    }
}

impl<T: Clone + Send> GraphIterator for SnapshotIterator<T> {
    type Item = T;

    fn advance(&mut self) -> bool {
        self.current = None;
        let Some(state) = self.state.clone() else {
            return false;
        };
        let guard = match state.read() {
            Ok(guard) => guard,
            Err(_) => {
                self.error = Some(GraphError::Backend {
                    op: self.op,
                    source: BackendError::LockPoisoned,
                });
                self.state = None;
                return false;
            }
        };

        for id in self.ids.by_ref() {
            if let Some(item) = (self.lookup)(&*guard, &id) {
                self.current = Some(item);
                return true;
            }
        }
        false
    }

    fn current(&self) -> Option<T> {
        self.current.clone()
    }

    fn take_error(&mut self) -> Option<GraphError> {
        self.error.take()
    }

    fn close(&mut self) -> Result<()> {
        self.state = None;
        self.ids = Vec::new().into_iter();
        self.current = None;
        Ok(())
    }
}
