//! OPC package engine
//!
//! This module models a zip container as a graph of logical parts:
//!
//! - **[`PartUri`]**: normalized, case-insensitive part names
//! - **[`Part`]**: a part's content, either buffered in memory or stored in
//!   the archive
//! - **[`ContentTypes`]**: the media-type registry
//! - **[`RelationshipSet`]**: typed edges from the package root or a part
//! - **[`Package`]**: the part store tying them together
//!
//! # Deferred writes
//!
//! Nothing touches the file on disk until [`Package::flush`] (or
//! [`Package::close`]). Created and rewritten parts are buffered, relationship
//! sets and the registry are serialized into their parts at flush time, and the
//! new archive replaces the old one with a single rename:
//!
//! ```text
//!  open ──► parts: Stored ──write/create──► Buffered
//!                  ▲                           │
//!                  └────────── flush ◄─────────┘
//! ```

mod content_types;
mod part;
mod part_uri;
mod relationships;
mod store;

pub use content_types::{
    ContentType, ContentTypeRule, ContentTypes, CONTENT_TYPES_NAMESPACE,
    CONTENT_TYPES_PART_NAME, FALLBACK_CONTENT_TYPE,
};
pub use part::{Part, PartContent};
pub use part_uri::{PartUri, PACKAGE_URI_PREFIXES};
pub use relationships::{
    Relationship, RelationshipOwner, RelationshipSet, RelationshipsState, TargetMode,
    RELATIONSHIPS_NAMESPACE,
};
pub use store::{OpenMode, Package, PackageSnapshot};

/// Media type of relationship parts
pub const RELATIONSHIPS_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.relationships+xml";

/// Errors raised by the package engine
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("invalid part name: {0:?}")]
    InvalidPartName(String),
    #[error("part already exists: {0}")]
    PartExists(PartUri),
    #[error("part not found: {0}")]
    PartNotFound(PartUri),
    #[error("malformed container part {part}: {reason}")]
    MalformedContainer { part: String, reason: String },
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
