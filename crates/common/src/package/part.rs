use super::relationships::RelationshipsState;
use super::PartUri;

/// Where a part's bytes currently live.
///
/// Parts move from `Buffered` to `Stored` only when the package is flushed;
/// writing to a stored part buffers it again until the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartContent {
    /// In-memory content not yet written to the archive
    Buffered(Vec<u8>),
    /// Content is the named entry of the open archive
    Stored { entry: String },
}

/// A logical file inside the package
#[derive(Debug, Clone)]
pub struct Part {
    uri: PartUri,
    content: PartContent,
    pub(crate) relationships: RelationshipsState,
}

impl Part {
    pub(crate) fn stored(uri: PartUri, entry: String) -> Self {
        Self {
            uri,
            content: PartContent::Stored { entry },
            relationships: RelationshipsState::Unloaded,
        }
    }

    pub(crate) fn buffered(uri: PartUri, bytes: Vec<u8>) -> Self {
        Self {
            uri,
            content: PartContent::Buffered(bytes),
            relationships: RelationshipsState::Unloaded,
        }
    }

    pub fn uri(&self) -> &PartUri {
        &self.uri
    }

    pub fn content(&self) -> &PartContent {
        &self.content
    }

    /// Whether the part has content that has not reached the archive
    pub fn is_buffered(&self) -> bool {
        matches!(self.content, PartContent::Buffered(_))
    }

    pub(crate) fn set_content(&mut self, bytes: Vec<u8>) {
        self.content = PartContent::Buffered(bytes);
    }

    /// Record that the part now lives in the archive under its own name
    pub(crate) fn materialize(&mut self) {
        if self.is_buffered() {
            self.content = PartContent::Stored {
                entry: self.uri.entry_name().to_string(),
            };
        }
    }
}
