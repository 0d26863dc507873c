//! Part names
//!
//! A part is addressed by an absolute, slash-separated name such as
//! `/extension.vsixmanifest`. Names compare ASCII case-insensitively, which is
//! how OPC consumers treat them, but the original spelling is kept so that zip
//! entries are written back the way they were found.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::PackageError;

/// Scheme prefixes accepted in front of part names
pub const PACKAGE_URI_PREFIXES: [&str; 2] = ["package://", "package:"];

const RELATIONSHIPS_SEGMENT: &str = "_rels";
const RELATIONSHIPS_EXTENSION: &str = ".rels";

/// A normalized part name: leading `/`, no empty, `.` or `..` segments
#[derive(Debug, Clone)]
pub struct PartUri(String);

impl PartUri {
    /// Normalize a part name.
    ///
    /// Backslashes become slashes and `.`/`..` segments are resolved. A raw
    /// name such as a zip entry keeps any `?` or `#` it contains; once a
    /// `package:` prefix marks the input as a URI, the query and fragment
    /// are dropped as in [`PartUri::from_uri`].
    pub fn parse(name: &str) -> Result<Self, PackageError> {
        Self::normalize(name, false)
    }

    /// Normalize a part URI such as a relationship target, dropping any
    /// query or fragment
    pub fn from_uri(uri: &str) -> Result<Self, PackageError> {
        Self::normalize(uri, true)
    }

    fn normalize(name: &str, mut is_uri: bool) -> Result<Self, PackageError> {
        let invalid = || PackageError::InvalidPartName(name.to_string());

        let mut raw = name.replace('\\', "/");
        for prefix in PACKAGE_URI_PREFIXES {
            if let Some(rest) = raw.strip_prefix(prefix) {
                raw = rest.to_string();
                is_uri = true;
                break;
            }
        }
        if is_uri {
            if let Some(idx) = raw.find(['?', '#']) {
                raw.truncate(idx);
            }
        }
        if raw.is_empty() || raw.ends_with('/') {
            return Err(invalid());
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop().ok_or_else(invalid)?;
                }
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Err(invalid());
        }
        Ok(PartUri(format!("/{}", segments.join("/"))))
    }

    /// The package root's relationship part, `/_rels/.rels`
    pub fn root_relationships() -> Self {
        PartUri(format!("/{RELATIONSHIPS_SEGMENT}/{RELATIONSHIPS_EXTENSION}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the zip entry holding this part (no leading slash)
    pub fn entry_name(&self) -> &str {
        &self.0[1..]
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Directory portion including the trailing slash, e.g. `/a/b/`
    pub fn directory(&self) -> &str {
        let idx = self.0.rfind('/').unwrap_or(0);
        &self.0[..=idx]
    }

    /// Extension without the dot, if the file name has one
    pub fn extension(&self) -> Option<&str> {
        let file_name = self.file_name();
        match file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Relationship part for this part: `/dir/name` -> `/dir/_rels/name.rels`
    pub fn relationships_uri(&self) -> Self {
        PartUri(format!(
            "{}{RELATIONSHIPS_SEGMENT}/{}{RELATIONSHIPS_EXTENSION}",
            self.directory(),
            self.file_name()
        ))
    }

    pub fn is_relationships_part(&self) -> bool {
        let mut segments = self.0.rsplit('/');
        let file_name = segments.next().unwrap_or_default();
        let parent = segments.next().unwrap_or_default();
        parent.eq_ignore_ascii_case(RELATIONSHIPS_SEGMENT)
            && file_name
                .to_ascii_lowercase()
                .ends_with(RELATIONSHIPS_EXTENSION)
    }

    /// Resolve a relationship target against the directory of `base`.
    ///
    /// `base` is the owning part, or `None` for the package root.
    pub fn resolve(base: Option<&PartUri>, target: &str) -> Result<Self, PackageError> {
        let target = target.replace('\\', "/");
        if target.starts_with('/') || PACKAGE_URI_PREFIXES.iter().any(|p| target.starts_with(p)) {
            return Self::from_uri(&target);
        }
        let directory = base.map(PartUri::directory).unwrap_or("/");
        Self::from_uri(&format!("{directory}{target}"))
    }

    /// Whether this name equals `parent` or lies beneath it.
    ///
    /// Comparison is segment-wise and case-insensitive; `/a/bc` is not
    /// contained by `/a/b`.
    pub fn equal_or_contained_by(&self, parent: &PartUri) -> bool {
        let mut own = self.segments();
        parent.segments().all(|parent_segment| {
            own.next()
                .is_some_and(|segment| segment.eq_ignore_ascii_case(parent_segment))
        })
    }
}

impl PartialEq for PartUri {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PartUri {}

impl Hash for PartUri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

impl Ord for PartUri {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let rhs = other.0.bytes().map(|b| b.to_ascii_lowercase());
        lhs.cmp(rhs)
    }
}

impl PartialOrd for PartUri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PartUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for PartUri {
    type Error = PackageError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl std::str::FromStr for PartUri {
    type Err = PackageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
