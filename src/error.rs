//! Error types for slice composition and persistence.

use thiserror::Error;

/// How a mount name collided with an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// Same name as the slice being mounted into.
    Parent,
    /// Same name as a branch already mounted (at any depth).
    Branch,
    /// A branch nested inside the child collides with the parent's names.
    NestedBranch,
}

impl std::fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollisionKind::Parent => f.write_str("the slice to mount into"),
            CollisionKind::Branch => f.write_str("a slice already mounted"),
            CollisionKind::NestedBranch => f.write_str("a sub-slice of the slice being mounted"),
        }
    }
}

/// Slice composition and reducer errors
#[derive(Debug, Error)]
pub enum SliceError {
    #[error("Slice name collision: \"{name}\" collides with {kind} ({target})")]
    NameCollision {
        name: String,
        target: String,
        kind: CollisionKind,
    },

    #[error("State selector for \"{branch}\" mounted into \"{parent}\" returned no state")]
    MissingSubstate { branch: String, parent: String },

    #[error("Unknown branch: {0}")]
    UnknownBranch(String),

    #[error("Unknown action \"{action}\" for \"{branch}\"")]
    UnknownAction { branch: String, action: String },

    #[error("Unknown selector \"{selector}\" for \"{branch}\"")]
    UnknownSelector { branch: String, selector: String },
}

/// Persistence sink and loader errors
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Loader failed: {0}")]
    Loader(String),

    #[error("Sink failed: {0}")]
    Sink(String),
}

/// Store-level errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("Persistence requires a tokio runtime, but none is running")]
    NoRuntime,

    #[error("Action type \"{0}\" is reserved")]
    ReservedAction(String),
}

/// Configuration and logging setup errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
