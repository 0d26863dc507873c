use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::content_types::ContentTypes;
use super::part::{Part, PartContent};
use super::relationships::{
    Relationship, RelationshipOwner, RelationshipSet, RelationshipsState,
};
use super::{PackageError, PartUri, RELATIONSHIPS_CONTENT_TYPE};

/// How a package is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

/// Everything about an open package that lives in memory
#[derive(Debug, Clone)]
struct PackageState {
    parts: BTreeMap<PartUri, Part>,
    root_relationships: RelationshipsState,
    content_types: ContentTypes,
    /// Stored entries were dropped since the last flush
    removed_entries: bool,
}

/// A saved copy of a package's in-memory state; see [`Package::snapshot`]
#[derive(Debug, Clone)]
pub struct PackageSnapshot(PackageState);

/// An open OPC container.
///
/// The package owns every part in a table keyed by normalized name.
/// Relationships and the content type registry are in-memory views that are
/// written back into their parts on flush.
///
/// # Examples
///
/// ```ignore
/// let mut package = Package::open("extension.vsix", OpenMode::ReadWrite)?;
/// let uri = PartUri::parse("/notes.txt")?;
/// package.create_part(&uri, "text/plain")?;
/// package.write_part(&uri, b"hello".to_vec())?;
/// // the file on disk is unchanged until here
/// package.close()?;
/// ```
pub struct Package {
    path: PathBuf,
    mode: OpenMode,
    archive: ZipArchive<File>,
    state: PackageState,
    closed: bool,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("parts", &self.state.parts.len())
            .finish()
    }
}

impl Package {
    /// Open a package and discover its parts.
    ///
    /// The content type registry is loaded eagerly; relationship sets are
    /// loaded on first use.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, PackageError> {
        let path = path.as_ref().to_path_buf();
        let file = match mode {
            OpenMode::Read => File::open(&path)?,
            OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).open(&path)?,
        };
        let mut archive = ZipArchive::new(file)?;

        let mut parts = BTreeMap::new();
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let uri = match PartUri::parse(&name) {
                Ok(uri) => uri,
                Err(e) => {
                    tracing::warn!("skipping zip entry {:?}: {}", name, e);
                    continue;
                }
            };
            if parts.contains_key(&uri) {
                return Err(PackageError::MalformedContainer {
                    part: uri.to_string(),
                    reason: "duplicate part name".into(),
                });
            }
            parts.insert(uri.clone(), Part::stored(uri, name));
        }

        let registry_uri = ContentTypes::part_uri();
        let content_types = match parts.get(&registry_uri).map(Part::content) {
            Some(PartContent::Stored { entry }) => {
                let bytes = read_entry(&mut archive, entry)?;
                ContentTypes::from_xml(&bytes)?
            }
            _ => ContentTypes::new(),
        };

        tracing::debug!(
            "opened package {} ({:?}, {} parts)",
            path.display(),
            mode,
            parts.len()
        );

        Ok(Self {
            path,
            mode,
            archive,
            state: PackageState {
                parts,
                root_relationships: RelationshipsState::Unloaded,
                content_types,
                removed_entries: false,
            },
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    fn ensure_writable(&self, action: &str) -> Result<(), PackageError> {
        match self.mode {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::Read => Err(PackageError::InvalidOperation(format!(
                "cannot {action}: package is open read-only"
            ))),
        }
    }

    /* Parts */

    pub fn get_part(&self, uri: &PartUri) -> Option<&Part> {
        self.state.parts.get(uri)
    }

    pub fn contains_part(&self, uri: &PartUri) -> bool {
        self.state.parts.contains_key(uri)
    }

    /// All parts, ordered by name
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.state.parts.values()
    }

    /// Create an empty, buffered part.
    ///
    /// The registry is updated so the part resolves to `media_type`.
    pub fn create_part(&mut self, uri: &PartUri, media_type: &str) -> Result<&Part, PackageError> {
        self.ensure_writable("create a part")?;
        if self.state.parts.contains_key(uri) {
            return Err(PackageError::PartExists(uri.clone()));
        }
        self.state.content_types.register(uri, media_type);
        tracing::debug!("created part {} ({})", uri, media_type);
        Ok(self
            .state
            .parts
            .entry(uri.clone())
            .or_insert_with(|| Part::buffered(uri.clone(), Vec::new())))
    }

    /// Open a fresh reader over a part's content.
    ///
    /// Buffered parts are read from the start every time; stored parts get a
    /// new decompressing view of their zip entry.
    pub fn open_part(&mut self, uri: &PartUri) -> Result<Box<dyn Read + '_>, PackageError> {
        let part = self
            .state
            .parts
            .get(uri)
            .ok_or_else(|| PackageError::PartNotFound(uri.clone()))?;
        match part.content() {
            PartContent::Buffered(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
            PartContent::Stored { entry } => Ok(Box::new(self.archive.by_name(entry)?)),
        }
    }

    pub fn read_part(&mut self, uri: &PartUri) -> Result<Vec<u8>, PackageError> {
        let mut bytes = Vec::new();
        self.open_part(uri)?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Replace a part's content; the part is buffered until the next flush
    pub fn write_part(&mut self, uri: &PartUri, bytes: Vec<u8>) -> Result<(), PackageError> {
        self.ensure_writable("write a part")?;
        let part = self
            .state
            .parts
            .get_mut(uri)
            .ok_or_else(|| PackageError::PartNotFound(uri.clone()))?;
        part.set_content(bytes);
        Ok(())
    }

    /// Remove a part together with its relationship part and any
    /// content type override naming it
    pub fn remove_part(&mut self, uri: &PartUri) -> Result<bool, PackageError> {
        self.ensure_writable("remove a part")?;
        let Some(part) = self.state.parts.remove(uri) else {
            return Ok(false);
        };
        let mut removed_stored = !part.is_buffered();
        if let Some(rels) = self.state.parts.remove(&uri.relationships_uri()) {
            removed_stored |= !rels.is_buffered();
        }
        self.state.content_types.remove_override(uri);
        // an overwritten stored part still has an entry to drop
        self.state.removed_entries = true;
        tracing::debug!("removed part {} (stored: {})", uri, removed_stored);
        Ok(true)
    }

    /// Create or overwrite a part without going through `create_part`
    fn put_part(&mut self, uri: &PartUri, bytes: Vec<u8>, media_type: Option<&str>) {
        match self.state.parts.get_mut(uri) {
            Some(part) => part.set_content(bytes),
            None => {
                if let Some(media_type) = media_type {
                    self.state.content_types.register(uri, media_type);
                }
                self.state
                    .parts
                    .insert(uri.clone(), Part::buffered(uri.clone(), bytes));
            }
        }
    }

    /* Content types */

    pub fn content_types(&self) -> &ContentTypes {
        &self.state.content_types
    }

    pub fn content_types_mut(&mut self) -> Result<&mut ContentTypes, PackageError> {
        self.ensure_writable("modify content types")?;
        Ok(&mut self.state.content_types)
    }

    /// Media type a part resolves to
    pub fn media_type(&self, uri: &PartUri) -> &str {
        self.state.content_types.resolve(uri)
    }

    /* Relationships */

    fn relationships_state(
        &self,
        owner: &RelationshipOwner,
    ) -> Result<&RelationshipsState, PackageError> {
        match owner {
            RelationshipOwner::Package => Ok(&self.state.root_relationships),
            RelationshipOwner::Part(uri) => self
                .state
                .parts
                .get(uri)
                .map(|part| &part.relationships)
                .ok_or_else(|| PackageError::PartNotFound(uri.clone())),
        }
    }

    fn relationships_state_mut(
        &mut self,
        owner: &RelationshipOwner,
    ) -> Result<&mut RelationshipsState, PackageError> {
        match owner {
            RelationshipOwner::Package => Ok(&mut self.state.root_relationships),
            RelationshipOwner::Part(uri) => self
                .state
                .parts
                .get_mut(uri)
                .map(|part| &mut part.relationships)
                .ok_or_else(|| PackageError::PartNotFound(uri.clone())),
        }
    }

    /// Load an owner's relationship set if it has not been loaded yet.
    ///
    /// A missing relationship part yields an empty set. A part created in
    /// this session can only have a relationship part created through its
    /// own loaded set, so virtual owners always start empty.
    pub fn ensure_relationships(&mut self, owner: &RelationshipOwner) -> Result<(), PackageError> {
        if self.relationships_state(owner)?.loaded().is_some() {
            return Ok(());
        }
        let rels_uri = owner.relationships_uri();
        let set = if self.state.parts.contains_key(&rels_uri) {
            let bytes = self.read_part(&rels_uri)?;
            RelationshipSet::from_xml(&rels_uri, &bytes)?
        } else {
            RelationshipSet::new()
        };
        *self.relationships_state_mut(owner)? = RelationshipsState::Loaded(set);
        Ok(())
    }

    pub fn relationships(
        &mut self,
        owner: &RelationshipOwner,
    ) -> Result<&RelationshipSet, PackageError> {
        self.ensure_relationships(owner)?;
        match self.relationships_state(owner)? {
            RelationshipsState::Loaded(set) => Ok(set),
            RelationshipsState::Unloaded => Err(PackageError::InvalidOperation(format!(
                "relationships of {owner:?} failed to load"
            ))),
        }
    }

    fn relationships_mut(
        &mut self,
        owner: &RelationshipOwner,
    ) -> Result<&mut RelationshipSet, PackageError> {
        self.ensure_writable("modify relationships")?;
        self.ensure_relationships(owner)?;
        match self.relationships_state_mut(owner)? {
            RelationshipsState::Loaded(set) => Ok(set),
            RelationshipsState::Unloaded => Err(PackageError::InvalidOperation(format!(
                "relationships of {owner:?} failed to load"
            ))),
        }
    }

    pub fn find_relationship_by_type(
        &mut self,
        owner: &RelationshipOwner,
        relationship_type: &str,
    ) -> Result<Option<Relationship>, PackageError> {
        Ok(self
            .relationships(owner)?
            .find_by_type(relationship_type)
            .cloned())
    }

    pub fn add_relationship(
        &mut self,
        owner: &RelationshipOwner,
        target: &PartUri,
        relationship_type: &str,
    ) -> Result<Relationship, PackageError> {
        Ok(self.relationships_mut(owner)?.add(target, relationship_type))
    }

    pub fn remove_relationship(
        &mut self,
        owner: &RelationshipOwner,
        id: &str,
    ) -> Result<bool, PackageError> {
        Ok(self.relationships_mut(owner)?.remove(id))
    }

    /* Session state */

    /// Whether anything would be written by a flush
    pub fn is_dirty(&self) -> bool {
        self.state.removed_entries
            || self.state.content_types.is_dirty()
            || self.state.parts.values().any(Part::is_buffered)
            || self.dirty_relationships().next().is_some()
    }

    fn dirty_relationships(&self) -> impl Iterator<Item = (RelationshipOwner, &RelationshipSet)> {
        let root = self
            .state
            .root_relationships
            .loaded()
            .map(|set| (RelationshipOwner::Package, set));
        let parts = self.state.parts.values().filter_map(|part| {
            part.relationships
                .loaded()
                .map(|set| (RelationshipOwner::Part(part.uri().clone()), set))
        });
        root.into_iter()
            .chain(parts)
            .filter(|(_, set)| set.is_dirty())
    }

    /// Serialize modified relationship sets and the registry into their
    /// parts. Only buffered state changes; the archive is not touched.
    pub fn stage(&mut self) -> Result<(), PackageError> {
        let pending: Vec<(RelationshipOwner, PartUri, Vec<u8>)> = self
            .dirty_relationships()
            .map(|(owner, set)| {
                let rels_uri = owner.relationships_uri();
                (owner, rels_uri, set.to_xml())
            })
            .collect();
        if pending.is_empty() && !self.state.content_types.is_dirty() {
            return Ok(());
        }
        self.ensure_writable("stage changes")?;

        for (owner, rels_uri, bytes) in pending {
            self.put_part(&rels_uri, bytes, Some(RELATIONSHIPS_CONTENT_TYPE));
            if let Some(set) = self.relationships_state_mut(&owner)?.loaded_mut() {
                set.mark_clean();
            }
        }
        if self.state.content_types.is_dirty() {
            let bytes = self.state.content_types.to_xml();
            self.put_part(&ContentTypes::part_uri(), bytes, None);
            self.state.content_types.mark_clean();
        }
        Ok(())
    }

    /// Capture the in-memory session state
    pub fn snapshot(&self) -> PackageSnapshot {
        PackageSnapshot(self.state.clone())
    }

    /// Return to a captured state, discarding everything done since
    pub fn restore(&mut self, snapshot: PackageSnapshot) {
        self.state = snapshot.0;
    }

    /// Discard every pending change and release the package without writing
    pub fn discard(mut self) {
        self.closed = true;
        tracing::debug!("discarded pending changes to {}", self.path.display());
    }

    /// Write all pending changes to disk.
    ///
    /// A complete new archive is written next to the package and renamed over
    /// it, so the file either keeps its old content or receives all changes.
    /// Parts become stored only once the rename succeeded. On failure the
    /// in-memory state, staged relationship and registry parts included, is
    /// left as it was before the call.
    pub fn flush(&mut self) -> Result<(), PackageError> {
        if !self.is_dirty() {
            return Ok(());
        }
        self.ensure_writable("flush changes")?;

        let snapshot = self.snapshot();
        if let Err(e) = self.write_archive() {
            self.restore(snapshot);
            return Err(e);
        }
        tracing::info!(
            "flushed package {} ({} parts)",
            self.path.display(),
            self.state.parts.len()
        );
        Ok(())
    }

    fn write_archive(&mut self) -> Result<(), PackageError> {
        self.stage()?;

        let directory = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut staged = tempfile::NamedTempFile::new_in(&directory)?;
        {
            let mut writer = ZipWriter::new(staged.as_file_mut());
            let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
            let registry_uri = ContentTypes::part_uri();
            // registry first, the way OPC producers lay packages out
            let ordered = self
                .state
                .parts
                .get(&registry_uri)
                .into_iter()
                .chain(self.state.parts.values().filter(|p| *p.uri() != registry_uri));
            for part in ordered {
                match part.content() {
                    PartContent::Stored { entry } => {
                        writer.raw_copy_file(self.archive.by_name(entry)?)?;
                    }
                    PartContent::Buffered(bytes) => {
                        writer.start_file(part.uri().entry_name(), options)?;
                        writer.write_all(bytes)?;
                    }
                }
            }
            writer.finish()?;
        }
        staged.as_file().sync_all()?;
        fs::set_permissions(staged.path(), fs::metadata(&self.path)?.permissions())?;
        staged
            .persist(&self.path)
            .map_err(|e| PackageError::Io(e.error))?;

        self.archive = ZipArchive::new(File::open(&self.path)?)?;
        for part in self.state.parts.values_mut() {
            part.materialize();
        }
        self.state.removed_entries = false;
        Ok(())
    }

    /// Flush and close the package
    pub fn close(mut self) -> Result<(), PackageError> {
        self.closed = true;
        self.flush()
    }
}

impl Drop for Package {
    fn drop(&mut self) {
        if self.closed || self.mode == OpenMode::Read || !self.is_dirty() {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::error!(
                "failed to flush package {} on drop: {}",
                self.path.display(),
                e
            );
        }
    }
}

fn read_entry(archive: &mut ZipArchive<File>, entry: &str) -> Result<Vec<u8>, PackageError> {
    let mut bytes = Vec::new();
    archive.by_name(entry)?.read_to_end(&mut bytes)?;
    Ok(bytes)
}
