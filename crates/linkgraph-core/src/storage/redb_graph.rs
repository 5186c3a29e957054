use crate::error::{BackendError, GraphError, Result, WithOp};
use crate::graph::{EdgeIterator, Graph, GraphIterator, LinkIterator};
use crate::types::{Edge, Link, LinkId};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

// Table definitions
const LINKS: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("links");
const EDGES: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("edges");

// Secondary indexes
const LINKS_BY_URL: TableDefinition<&str, &[u8; 16]> = TableDefinition::new("links_by_url");
const EDGE_IDS: TableDefinition<&[u8; 16], &[u8; 32]> = TableDefinition::new("edge_ids");

// Metadata table
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Default number of member keys a scan buffers per pull.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 256;

/// Tuning for [`RedbGraph`].
#[derive(Debug, Clone)]
pub struct RedbOptions {
    /// Member keys pulled from a scan's snapshot at a time.
    pub scan_page_size: usize,
}

impl Default for RedbOptions {
    fn default() -> Self {
        Self {
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }
}

/// Link graph persisted in a redb database file.
///
/// Layout:
/// - `links`: link id → link
/// - `links_by_url`: url → link id (enforces unique URLs)
/// - `edges`: src id ‖ dst id → edge (enforces unique `(src, dst)`, and
///   keeps edges ordered by source for partition scans)
/// - `edge_ids`: edge id → src id ‖ dst id (enforces unique edge IDs)
pub struct RedbGraph {
    db: Arc<Database>,
    path: PathBuf,
    options: RedbOptions,
}

impl RedbGraph {
    /// Open or create a graph database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, RedbOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: RedbOptions) -> Result<Self> {
        const OP: &str = "open graph";

        if options.scan_page_size == 0 {
            return Err(GraphError::Config(
                "scan_page_size must be greater than zero".to_string(),
            ));
        }

        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).op(OP)?;
        }

        let is_new = !path.exists();
        let db = Database::create(&path).op(OP)?;

        if !is_new {
            Self::check_schema_version(&db)?;
        }

        let write_txn = db.begin_write().op(OP)?;
        {
            let _ = write_txn.open_table(LINKS).op(OP)?;
            let _ = write_txn.open_table(EDGES).op(OP)?;
            let _ = write_txn.open_table(LINKS_BY_URL).op(OP)?;
            let _ = write_txn.open_table(EDGE_IDS).op(OP)?;
            let mut meta = write_txn.open_table(META).op(OP)?;
            if is_new {
                meta.insert(
                    SCHEMA_VERSION_KEY,
                    CURRENT_SCHEMA_VERSION.to_string().as_bytes(),
                )
                .op(OP)?;
            }
        }
        write_txn.commit().op(OP)?;

        if is_new {
            log::info!("created link graph at {}", path.display());
        } else {
            log::info!("opened link graph at {}", path.display());
        }

        Ok(Self {
            db: Arc::new(db),
            path,
            options,
        })
    }

    /// Check schema version. A database without one predates versioning.
    fn check_schema_version(db: &Database) -> Result<()> {
        const OP: &str = "check schema version";

        let read_txn = db.begin_read().op(OP)?;
        let found = match read_txn.open_table(META) {
            Ok(meta) => meta
                .get(SCHEMA_VERSION_KEY)
                .op(OP)?
                .and_then(|v| {
                    std::str::from_utf8(v.value())
                        .ok()
                        .and_then(|s| s.parse::<u32>().ok())
                })
                .unwrap_or(0),
            Err(redb::TableError::TableDoesNotExist(_)) => 0,
            Err(e) => return Err(e).op(OP),
        };

        if found != CURRENT_SCHEMA_VERSION {
            return Err(BackendError::SchemaVersion {
                found,
                expected: CURRENT_SCHEMA_VERSION,
            })
            .op(OP);
        }
        Ok(())
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key of the `edges` table: source bytes then destination bytes, so
    /// byte order groups edges by source.
    fn pair_key(src: &Uuid, dst: &Uuid) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(src.as_bytes());
        key[16..].copy_from_slice(dst.as_bytes());
        key
    }

    fn serialize<T: serde::Serialize>(value: &T) -> std::result::Result<Vec<u8>, BackendError> {
        bincode::serialize(value).map_err(BackendError::from)
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, BackendError> {
        bincode::deserialize(bytes).map_err(BackendError::from)
    }

    /// Open a scan over `[from, to)` of `table`.
    ///
    /// Membership comes from a read snapshot taken here, filtered by the
    /// cutoff as of now. Each `advance` then reads the record's latest
    /// committed value, so a record written since the call shows its new
    /// fields and one deleted since the call is skipped.
    fn scan<T, const N: usize>(
        &self,
        op: &'static str,
        table: TableDefinition<'static, &'static [u8; N], &'static [u8]>,
        from: [u8; N],
        to: [u8; N],
        before: DateTime<Utc>,
        stamp: fn(&T) -> DateTime<Utc>,
        ident: fn(&T) -> Uuid,
    ) -> Result<SnapshotIterator<T, N>>
    where
        T: DeserializeOwned + Clone + Send,
    {
        let members = if from < to {
            let read_txn = self.db.begin_read().op(op)?;
            let snapshot = read_txn.open_table(table).op(op)?;
            // The returned range keeps the snapshot alive on its own.
            Some(snapshot.range::<&[u8; N]>(&from..&to).op(op)?)
        } else {
            None
        };

        Ok(SnapshotIterator {
            db: self.db.clone(),
            table,
            members,
            pending: VecDeque::new(),
            batch: self.options.scan_page_size,
            before,
            stamp,
            ident,
            current: None,
            error: None,
            op,
        })
    }
}

impl Graph for RedbGraph {
    fn upsert_link(&self, link: &mut Link) -> Result<()> {
        const OP: &str = "upsert link";

        let write_txn = self.db.begin_write().op(OP)?;
        let stored = {
            let mut links = write_txn.open_table(LINKS).op(OP)?;
            let mut by_url = write_txn.open_table(LINKS_BY_URL).op(OP)?;

            let existing_id = by_url.get(link.url.as_str()).op(OP)?.map(|g| *g.value());
            match existing_id {
                Some(id_bytes) => {
                    let bytes = links
                        .get(&id_bytes)
                        .op(OP)?
                        .map(|g| g.value().to_vec())
                        .ok_or_else(|| BackendError::InconsistentIndex(format!(
                            "url {} points at missing link {}",
                            link.url,
                            Uuid::from_bytes(id_bytes)
                        )))
                        .op(OP)?;
                    let mut existing: Link = Self::deserialize(&bytes).op(OP)?;
                    if link.retrieved_at > existing.retrieved_at {
                        existing.retrieved_at = link.retrieved_at;
                        let bytes = Self::serialize(&existing).op(OP)?;
                        links.insert(&id_bytes, bytes.as_slice()).op(OP)?;
                    }
                    existing
                }
                None => {
                    let id = loop {
                        let id = Uuid::new_v4();
                        if links.get(id.as_bytes()).op(OP)?.is_none() {
                            break id;
                        }
                        log::debug!("generated link id {} already taken, retrying", id);
                    };
                    let stored = Link {
                        id,
                        url: link.url.clone(),
                        retrieved_at: link.retrieved_at,
                    };
                    let bytes = Self::serialize(&stored).op(OP)?;
                    links.insert(id.as_bytes(), bytes.as_slice()).op(OP)?;
                    by_url.insert(link.url.as_str(), id.as_bytes()).op(OP)?;
                    log::debug!("inserted link {} ({})", id, stored.url);
                    stored
                }
            }
        };
        write_txn.commit().op(OP)?;

        *link = stored;
        Ok(())
    }

    fn find_link(&self, id: LinkId) -> Result<Link> {
        const OP: &str = "find link";

        let read_txn = self.db.begin_read().op(OP)?;
        let links = read_txn.open_table(LINKS).op(OP)?;
        let bytes = links
            .get(id.as_bytes())
            .op(OP)?
            .map(|g| g.value().to_vec())
            .ok_or(GraphError::NotFound(id))?;
        Self::deserialize(&bytes).op(OP)
    }

    fn upsert_edge(&self, edge: &mut Edge) -> Result<()> {
        const OP: &str = "upsert edge";

        let write_txn = self.db.begin_write().op(OP)?;

        let endpoints_known = {
            let links = write_txn.open_table(LINKS).op(OP)?;
            links.get(edge.src.as_bytes()).op(OP)?.is_some()
                && links.get(edge.dst.as_bytes()).op(OP)?.is_some()
        };
        if !endpoints_known {
            write_txn.abort().op(OP)?;
            return Err(GraphError::UnknownEdgeLinks {
                src: edge.src,
                dst: edge.dst,
            });
        }

        let now = Utc::now();
        let key = Self::pair_key(&edge.src, &edge.dst);
        let stored = {
            let mut edges = write_txn.open_table(EDGES).op(OP)?;
            let mut edge_ids = write_txn.open_table(EDGE_IDS).op(OP)?;

            let existing = edges.get(&key).op(OP)?.map(|g| g.value().to_vec());
            let stored = match existing {
                Some(bytes) => {
                    let mut existing: Edge = Self::deserialize(&bytes).op(OP)?;
                    existing.updated_at = existing.updated_at.max(now);
                    existing
                }
                None => {
                    let id = loop {
                        let id = Uuid::new_v4();
                        if edge_ids.get(id.as_bytes()).op(OP)?.is_none() {
                            break id;
                        }
                        log::debug!("generated edge id {} already taken, retrying", id);
                    };
                    edge_ids.insert(id.as_bytes(), &key).op(OP)?;
                    log::debug!("inserted edge {} ({} -> {})", id, edge.src, edge.dst);
                    Edge {
                        id,
                        src: edge.src,
                        dst: edge.dst,
                        updated_at: now,
                    }
                }
            };
            let bytes = Self::serialize(&stored).op(OP)?;
            edges.insert(&key, bytes.as_slice()).op(OP)?;
            stored
        };
        write_txn.commit().op(OP)?;

        *edge = stored;
        Ok(())
    }

    fn remove_stale_edges(&self, from: LinkId, updated_before: DateTime<Utc>) -> Result<()> {
        const OP: &str = "remove stale edges";

        let lo = Self::pair_key(&from, &Uuid::nil());
        let hi = Self::pair_key(&from, &Uuid::from_u128(u128::MAX));

        let write_txn = self.db.begin_write().op(OP)?;
        let removed = {
            let mut edges = write_txn.open_table(EDGES).op(OP)?;
            let mut edge_ids = write_txn.open_table(EDGE_IDS).op(OP)?;

            let mut stale = Vec::new();
            for entry in edges.range::<&[u8; 32]>(&lo..=&hi).op(OP)? {
                let (key, value) = entry.op(OP)?;
                let edge: Edge = Self::deserialize(value.value()).op(OP)?;
                if edge.updated_at < updated_before {
                    stale.push((*key.value(), edge.id));
                }
            }

            for (key, id) in &stale {
                edges.remove(key).op(OP)?;
                edge_ids.remove(id.as_bytes()).op(OP)?;
            }
            stale.len()
        };
        write_txn.commit().op(OP)?;

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
        let it = self.scan(
            "links",
            LINKS,
            *from.as_bytes(),
            *to.as_bytes(),
            retrieved_before,
            |link: &Link| link.retrieved_at,
            |link: &Link| link.id,
        )?;
        Ok(Box::new(it))
    }

    fn edges(
        &self,
        from: LinkId,
        to: LinkId,
        updated_before: DateTime<Utc>,
    ) -> Result<EdgeIterator> {
        // Every key with a source in [from, to) sorts in [from‖0, to‖0).
        let it = self.scan(
            "edges",
            EDGES,
            Self::pair_key(&from, &Uuid::nil()),
            Self::pair_key(&to, &Uuid::nil()),
            updated_before,
            |edge: &Edge| edge.updated_at,
            |edge: &Edge| edge.id,
        )?;
        Ok(Box::new(it))
    }
}

type SnapshotRange<const N: usize> = redb::Range<'static, &'static [u8; N], &'static [u8]>;

/// Range-scan result for the redb graph.
///
/// `members` walks the snapshot taken when the scan was opened and yields
/// `(key, id)` pairs that matched the cutoff then. Records are fetched
/// fresh from the database one `advance` at a time; a key that is gone, or
/// now holds a record with a different ID, is skipped.
struct SnapshotIterator<T, const N: usize> {
    db: Arc<Database>,
    table: TableDefinition<'static, &'static [u8; N], &'static [u8]>,
    members: Option<SnapshotRange<N>>,
    pending: VecDeque<([u8; N], Uuid)>,
    batch: usize,
    before: DateTime<Utc>,
    stamp: fn(&T) -> DateTime<Utc>,
    ident: fn(&T) -> Uuid,
    current: Option<T>,
    error: Option<GraphError>,
    op: &'static str,
}

impl<T: DeserializeOwned, const N: usize> SnapshotIterator<T, N> {
    /// Pull up to `batch` more members from the snapshot.
    fn fill(&mut self) -> std::result::Result<(), BackendError> {
        let Some(members) = self.members.as_mut() else {
            return Ok(());
        };

        let mut exhausted = false;
        while self.pending.len() < self.batch {
            let Some(entry) = members.next() else {
                exhausted = true;
                break;
            };
            let (key, value) = entry?;
            let item: T = bincode::deserialize(value.value())?;
            if (self.stamp)(&item) < self.before {
                self.pending.push_back((*key.value(), (self.ident)(&item)));
            }
        }

        if exhausted {
            self.members = None;
        }
        Ok(())
    }

    /// Latest committed record under `key`.
    fn lookup(&self, key: &[u8; N]) -> std::result::Result<Option<T>, BackendError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(self.table)?;
        let bytes = table.get(key)?.map(|g| g.value().to_vec());
        match bytes {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn fail(&mut self, err: BackendError) {
        log::warn!("{} scan failed: {}", self.op, err);
        self.error = Some(GraphError::Backend {
            op: self.op,
            source: err,
        });
        self.members = None;
        self.pending.clear();
    }
}

impl<T, const N: usize> GraphIterator for SnapshotIterator<T, N>
where
    T: DeserializeOwned + Clone + Send,
{
    type Item = T;

    fn advance(&mut self) -> bool {
        self.current = None;
        loop {
            if self.pending.is_empty() {
                if let Err(e) = self.fill() {
                    self.fail(e);
                    return false;
                }
            }
            let Some((key, id)) = self.pending.pop_front() else {
                return false;
            };

            match self.lookup(&key) {
                Ok(Some(item)) if (self.ident)(&item) == id => {
                    self.current = Some(item);
                    return true;
                }
                Ok(_) => log::debug!("{} scan skipping {}, removed since the scan began", self.op, id),
                Err(e) => {
                    self.fail(e);
                    return false;
                }
            }
        }
    }

    fn current(&self) -> Option<T> {
        self.current.clone()
    }

    fn take_error(&mut self) -> Option<GraphError> {
        self.error.take()
    }

    fn close(&mut self) -> Result<()> {
        self.members = None;
        self.pending.clear();
        self.current = None;
        Ok(())
    }
}
