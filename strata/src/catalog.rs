//! Catalog data model: identifiers, catalogs, resources, and resource paths.
//!
//! Catalogs are built once, validated at construction, and never mutated
//! afterwards. Every accessor hands out shared references, so a catalog can
//! be read from any number of threads without locking.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use strata::catalog::{CatalogId, Resource, ResourceCatalog};
//! use strata::representation::{DataType, Representation};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let resource = Resource::new(
//!     "resource1",
//!     Some("°C"),
//!     ["group1"],
//!     vec![Representation::new(DataType::Float64, Duration::from_secs(1))?],
//! )?;
//!
//! let catalog = ResourceCatalog::new(
//!     CatalogId::parse("/A/B/C")?,
//!     [("a", "b")],
//!     vec![resource],
//! )?;
//!
//! let (resource, representation) = catalog.find("resource1", "1_s").unwrap();
//! assert_eq!(resource.unit.as_deref(), Some("°C"));
//! assert_eq!(representation.data_type, DataType::Float64);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result, StrataError};
use crate::representation::Representation;

/// Slash-delimited hierarchical catalog identifier such as `/A/B/C`.
///
/// Every segment starts with an ASCII letter or underscore and continues
/// with ASCII letters, digits, or underscores. Comparison is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CatalogId(String);

impl CatalogId {
    /// Parses and validates a catalog identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidCatalogId`] if the identifier is empty,
    /// does not start with `/`, ends with `/`, or contains an invalid segment.
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = |reason: &str| -> StrataError {
            CatalogError::InvalidCatalogId {
                id: id.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        let Some(rest) = id.strip_prefix('/') else {
            return Err(invalid("must start with '/'"));
        };

        for segment in rest.split('/') {
            if !is_identifier(segment) {
                return Err(invalid("segments must match [A-Za-z_][A-Za-z0-9_]*"));
            }
        }

        Ok(Self(id.to_string()))
    }

    /// Wraps an identifier known to be valid.
    pub(crate) fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the path segments without the leading slash.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[1..].split('/')
    }

    /// Returns `true` if `self` lies strictly below `other` in the hierarchy.
    pub fn is_nested_under(&self, other: &CatalogId) -> bool {
        self.0.len() > other.0.len()
            && self.0.starts_with(other.as_str())
            && self.0.as_bytes()[other.0.len()] == b'/'
    }
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CatalogId {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CatalogId {
    type Error = StrataError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CatalogId> for String {
    fn from(id: CatalogId) -> Self {
        id.0
    }
}

impl AsRef<str> for CatalogId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A catalog identifier with a human-readable description, as returned
/// when listing the children of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRegistration {
    /// Identifier of the listed catalog.
    pub id: CatalogId,
    /// Human-readable description.
    pub description: String,
}

impl CatalogRegistration {
    /// Creates a new registration.
    pub fn new(id: CatalogId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
        }
    }
}

/// A named time series within a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Name, unique within the owning catalog.
    pub id: String,

    /// Optional physical unit, e.g. `°C`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Organizational group tags.
    #[serde(default)]
    pub groups: BTreeSet<String>,

    /// Sampling schemas, at least one.
    pub representations: Vec<Representation>,
}

impl Resource {
    /// Creates a new resource.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the name is not a valid identifier, no
    /// representation is given, or a representation is invalid.
    pub fn new<I, G>(
        id: impl Into<String>,
        unit: Option<&str>,
        groups: I,
        representations: Vec<Representation>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = G>,
        G: Into<String>,
    {
        let resource = Self {
            id: id.into(),
            unit: unit.map(str::to_string),
            groups: groups.into_iter().map(Into::into).collect(),
            representations,
        };
        resource.validate()?;
        Ok(resource)
    }

    /// Validates the resource.
    ///
    /// # Errors
    ///
    /// See [`Resource::new`].
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.id) {
            return Err(CatalogError::InvalidResourceId {
                id: self.id.clone(),
                reason: "must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
            }
            .into());
        }

        if self.representations.is_empty() {
            return Err(CatalogError::NoRepresentations {
                resource: self.id.clone(),
            }
            .into());
        }

        for representation in &self.representations {
            representation.validate(&self.id)?;
        }

        Ok(())
    }

    /// Looks up a representation by its [`id`](Representation::id).
    pub fn representation(&self, representation_id: &str) -> Option<&Representation> {
        self.representations
            .iter()
            .find(|r| r.id() == representation_id)
    }
}

/// The full schema of one catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCatalog {
    /// Catalog identifier.
    pub id: CatalogId,

    /// Named string properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Resources in declaration order.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl ResourceCatalog {
    /// Creates a new catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if a resource is invalid or two resources
    /// share a name.
    pub fn new<I, K, V>(id: CatalogId, properties: I, resources: Vec<Resource>) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let catalog = Self {
            id,
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            resources,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Validates every resource and the uniqueness of resource names.
    ///
    /// # Errors
    ///
    /// See [`ResourceCatalog::new`].
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.resources.len());
        for resource in &self.resources {
            resource.validate()?;
            if !seen.insert(resource.id.as_str()) {
                return Err(CatalogError::DuplicateResource {
                    catalog: self.id.to_string(),
                    resource: resource.id.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Looks up a resource by name.
    pub fn resource(&self, resource_id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == resource_id)
    }

    /// Resolves a resource and one of its representations.
    pub fn find(
        &self,
        resource_id: &str,
        representation_id: &str,
    ) -> Option<(&Resource, &Representation)> {
        let resource = self.resource(resource_id)?;
        let representation = resource.representation(representation_id)?;
        Some((resource, representation))
    }

    /// Resolves a [`ResourcePath`] against this catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidResourcePath`] if the path names a
    /// different catalog or an unknown resource or representation.
    pub fn resolve(&self, path: &ResourcePath) -> Result<(&Resource, &Representation)> {
        if path.catalog_id != self.id {
            return Err(CatalogError::InvalidResourcePath {
                path: path.to_string(),
                reason: format!("path does not belong to catalog '{}'", self.id),
            }
            .into());
        }

        self.find(&path.resource_id, &path.representation_id)
            .ok_or_else(|| {
                CatalogError::InvalidResourcePath {
                    path: path.to_string(),
                    reason: "no such resource or representation".to_string(),
                }
                .into()
            })
    }

    /// Returns the paths of every representation in this catalog.
    pub fn resource_paths(&self) -> Vec<ResourcePath> {
        self.resources
            .iter()
            .flat_map(|resource| {
                resource.representations.iter().map(|representation| ResourcePath {
                    catalog_id: self.id.clone(),
                    resource_id: resource.id.clone(),
                    representation_id: representation.id(),
                })
            })
            .collect()
    }
}

/// Address of one representation: `/<catalog>/<resource>/<representation>`.
///
/// # Examples
///
/// ```rust
/// use strata::catalog::ResourcePath;
///
/// let path: ResourcePath = "/A/B/C/resource1/1_s".parse().unwrap();
/// assert_eq!(path.catalog_id.as_str(), "/A/B/C");
/// assert_eq!(path.resource_id, "resource1");
/// assert_eq!(path.representation_id, "1_s");
/// assert_eq!(path.to_string(), "/A/B/C/resource1/1_s");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath {
    /// Owning catalog.
    pub catalog_id: CatalogId,
    /// Resource name.
    pub resource_id: String,
    /// Representation identifier, e.g. `1_s`.
    pub representation_id: String,
}

impl ResourcePath {
    /// Parses a resource path.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidResourcePath`] if the path has fewer
    /// than three segments or its catalog part is invalid.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: String| -> StrataError {
            CatalogError::InvalidResourcePath {
                path: path.to_string(),
                reason,
            }
            .into()
        };

        let mut parts = path.rsplitn(3, '/');
        let (Some(representation_id), Some(resource_id), Some(catalog)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected /<catalog>/<resource>/<representation>".to_string()));
        };

        if representation_id.is_empty() || !is_identifier(resource_id) {
            return Err(invalid("empty representation or invalid resource name".to_string()));
        }

        let catalog_id = CatalogId::parse(catalog).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            catalog_id,
            resource_id: resource_id.to_string(),
            representation_id: representation_id.to_string(),
        })
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.catalog_id, self.resource_id, self.representation_id
        )
    }
}

impl FromStr for ResourcePath {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = StrataError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.to_string()
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
