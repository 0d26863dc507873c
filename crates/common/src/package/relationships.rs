//! Relationship graph
//!
//! Every owner (the package root or a part) has at most one relationship set,
//! stored in its sibling `_rels/<name>.rels` part. Relationships hold target
//! names, never live references; targets are resolved through the package
//! when they are followed.

use crate::xml::XmlElement;

use super::{PackageError, PartUri};

pub const RELATIONSHIPS_NAMESPACE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";

/// The source of a relationship set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationshipOwner {
    Package,
    Part(PartUri),
}

impl RelationshipOwner {
    /// Part holding this owner's relationship set
    pub fn relationships_uri(&self) -> PartUri {
        match self {
            RelationshipOwner::Package => PartUri::root_relationships(),
            RelationshipOwner::Part(part) => part.relationships_uri(),
        }
    }

    pub fn part(&self) -> Option<&PartUri> {
        match self {
            RelationshipOwner::Package => None,
            RelationshipOwner::Part(part) => Some(part),
        }
    }
}

impl From<PartUri> for RelationshipOwner {
    fn from(part: PartUri) -> Self {
        RelationshipOwner::Part(part)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetMode {
    #[default]
    Internal,
    External,
}

/// A typed, directed edge from an owner to a part or external resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub relationship_type: String,
    /// Target exactly as stored; relative targets are resolved against the owner
    pub target: String,
    pub target_mode: TargetMode,
}

impl Relationship {
    /// Resolve an internal target to a part name.
    ///
    /// Returns `None` for external targets.
    pub fn target_part(&self, owner: &RelationshipOwner) -> Result<Option<PartUri>, PackageError> {
        match self.target_mode {
            TargetMode::External => Ok(None),
            TargetMode::Internal => PartUri::resolve(owner.part(), &self.target).map(Some),
        }
    }
}

/// The loaded relationships of one owner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipSet {
    relationships: Vec<Relationship>,
    dirty: bool,
}

impl RelationshipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_xml(part: &PartUri, bytes: &[u8]) -> Result<Self, PackageError> {
        let malformed = |reason: String| PackageError::MalformedContainer {
            part: part.to_string(),
            reason,
        };
        let root = XmlElement::parse(bytes).map_err(|e| malformed(e.to_string()))?;
        if root.local_name() != "Relationships" {
            return Err(malformed(format!("unexpected root element {}", root.name)));
        }

        let mut relationships = Vec::new();
        for el in root.children_named("Relationship") {
            let required = |name: &str| {
                el.attr(name)
                    .map(str::to_string)
                    .ok_or_else(|| malformed(format!("Relationship without {name}")))
            };
            let target_mode = match el.attr("TargetMode") {
                None | Some("Internal") => TargetMode::Internal,
                Some("External") => TargetMode::External,
                Some(other) => return Err(malformed(format!("unknown TargetMode {other}"))),
            };
            relationships.push(Relationship {
                id: required("Id")?,
                relationship_type: required("Type")?,
                target: required("Target")?,
                target_mode,
            });
        }
        Ok(Self {
            relationships,
            dirty: false,
        })
    }

    pub fn to_xml(&self) -> Vec<u8> {
        let mut root =
            XmlElement::new("Relationships").with_attr("xmlns", RELATIONSHIPS_NAMESPACE);
        for rel in &self.relationships {
            let mut el = XmlElement::new("Relationship")
                .with_attr("Type", rel.relationship_type.as_str())
                .with_attr("Target", rel.target.as_str())
                .with_attr("Id", rel.id.as_str());
            if rel.target_mode == TargetMode::External {
                el.set_attr("TargetMode", "External");
            }
            root.push(el);
        }
        root.to_document()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter()
    }

    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|rel| rel.id == id)
    }

    /// First relationship of the given type
    pub fn find_by_type(&self, relationship_type: &str) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|rel| rel.relationship_type == relationship_type)
    }

    /// Add an internal relationship to `target`, allocating a fresh id
    pub fn add(&mut self, target: &PartUri, relationship_type: &str) -> Relationship {
        let rel = Relationship {
            id: self.next_id(),
            relationship_type: relationship_type.to_string(),
            target: target.to_string(),
            target_mode: TargetMode::Internal,
        };
        self.relationships.push(rel.clone());
        self.dirty = true;
        rel
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.relationships.len();
        self.relationships.retain(|rel| rel.id != id);
        let removed = self.relationships.len() != before;
        self.dirty |= removed;
        removed
    }

    fn next_id(&self) -> String {
        loop {
            let candidate = format!("R{}", &uuid::Uuid::new_v4().simple().to_string()[..16]);
            if self.get(&candidate).is_none() {
                return candidate;
            }
        }
    }
}

/// Relationship state of an owner.
///
/// Sets are read at most once, on the first explicit load; nothing is read
/// as a side effect of looking.
#[derive(Debug, Clone, Default)]
pub enum RelationshipsState {
    #[default]
    Unloaded,
    Loaded(RelationshipSet),
}

impl RelationshipsState {
    pub fn loaded(&self) -> Option<&RelationshipSet> {
        match self {
            RelationshipsState::Loaded(set) => Some(set),
            RelationshipsState::Unloaded => None,
        }
    }

    pub fn loaded_mut(&mut self) -> Option<&mut RelationshipSet> {
        match self {
            RelationshipsState::Loaded(set) => Some(set),
            RelationshipsState::Unloaded => None,
        }
    }
}
