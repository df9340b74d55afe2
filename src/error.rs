use std::path::PathBuf;

/// Failure taxonomy shared by the audit cache, the artifact store and the query server.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no free port in range {start}-{end}")]
    PortExhausted { start: u16, end: u16 },

    #[error("artifact schema v{stored} does not match current v{current}")]
    SchemaStale { stored: u32, current: u32 },

    #[error("failed to load {identity}: {reason}")]
    Load { identity: String, reason: String },

    #[error("invalid asset identity {0:?}")]
    InvalidIdentity(String),

    #[error("{identity} is outside the audited namespace {namespace}")]
    OutsideNamespace { identity: String, namespace: String },

    #[error("asset registry is still loading")]
    RegistryLoading,
}

impl AuditError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AuditError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            AuditError::NotFound(_) => true,
            AuditError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T, E = AuditError> = std::result::Result<T, E>;
