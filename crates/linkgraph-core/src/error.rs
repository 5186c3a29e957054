use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Link not found: {0}")]
    NotFound(Uuid),

    #[error("Unknown source and/or destination for edge: src={src}, dst={dst}")]
    UnknownEdgeLinks { src: Uuid, dst: Uuid },

    #[error("{op}: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Invalid partition: {0}")]
    Partition(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl GraphError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound(_))
    }

    pub fn is_unknown_edge_links(&self) -> bool {
        matches!(self, GraphError::UnknownEdgeLinks { .. })
    }
}

/// Underlying storage faults. Never interpreted, only wrapped with the
/// name of the operation that hit them.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database schema v{found} does not match supported v{expected}")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Inconsistent index: {0}")]
    InconsistentIndex(String),

    #[error("Graph lock poisoned")]
    LockPoisoned,
}

/// Attaches the failing operation's name to a backend fault.
pub trait WithOp<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T, E: Into<BackendError>> WithOp<T> for std::result::Result<T, E> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| GraphError::Backend {
            op,
            source: e.into(),
        })
    }
}
