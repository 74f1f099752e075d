//! Static catalog registry answering discovery and schema queries.
//!
//! The registry is built once from a list of [`CatalogEntry`] values and is
//! immutable afterwards: every query takes `&self` and returns either a
//! borrowed view or a freshly computed value. Share it behind an `Arc` to
//! serve concurrent callers without any locking.
//!
//! # Registration Matching
//!
//! [`CatalogRegistry::list_registrations`] normalizes its path to end with
//! `/`. A registered catalog is listed when its identifier starts with the
//! normalized path and it is not nested under another catalog that also
//! matches. Hence `/` lists the top-level catalogs and `/A/B/C` lists the
//! catalogs directly nested below `/A/B/C`:
//!
//! ```text
//! registered: /A/B/C  /A/B/C/D  /A/B/C/D/E  /X
//!
//! "/"        -> /A/B/C, /X
//! "/A/"      -> /A/B/C
//! "/A/B/C"   -> /A/B/C/D
//! "/unknown" -> (empty)
//! ```

use std::collections::HashMap;

use tracing::debug;

use crate::catalog::{CatalogId, CatalogRegistration, ResourceCatalog};
use crate::error::{CatalogError, Result};
use crate::window::TimeRange;

/// One registered catalog with its listing description and coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// The catalog schema.
    pub catalog: ResourceCatalog,
    /// Description returned in registrations.
    pub description: String,
    /// Overall time range the catalog can serve.
    pub time_range: TimeRange,
}

impl CatalogEntry {
    /// Creates an entry with an unbounded time range.
    pub fn new(catalog: ResourceCatalog, description: impl Into<String>) -> Self {
        Self {
            catalog,
            description: description.into(),
            time_range: TimeRange::UNBOUNDED,
        }
    }

    /// Replaces the time range of this entry.
    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }
}

/// Immutable, hierarchical namespace of catalogs.
#[derive(Debug, Clone, Default)]
pub struct CatalogRegistry {
    /// Entries sorted by catalog identifier.
    entries: Vec<CatalogEntry>,
    /// Map from identifier to position in `entries`.
    index: HashMap<String, usize>,
}

impl CatalogRegistry {
    /// Builds a registry from fully populated entries.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if a catalog is invalid, an identifier is
    /// registered twice, or a time range has `begin > end`.
    pub fn new(mut entries: Vec<CatalogEntry>) -> Result<Self> {
        entries.sort_by(|a, b| a.catalog.id.cmp(&b.catalog.id));

        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            entry.catalog.validate()?;

            let TimeRange { begin, end } = entry.time_range;
            if begin > end {
                return Err(CatalogError::InvalidTimeRange {
                    id: entry.catalog.id.to_string(),
                    begin,
                    end,
                }
                .into());
            }

            if index
                .insert(entry.catalog.id.to_string(), position)
                .is_some()
            {
                return Err(CatalogError::DuplicateCatalog {
                    id: entry.catalog.id.to_string(),
                }
                .into());
            }
        }

        Ok(Self { entries, index })
    }

    /// Returns the number of registered catalogs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no catalog is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in identifier order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    /// Lists the catalogs directly below `path`.
    ///
    /// Never fails: a path with nothing registered beneath it yields an
    /// empty list. See the module docs for the matching rules.
    pub fn list_registrations(&self, path: &str) -> Vec<CatalogRegistration> {
        if !path.starts_with('/') {
            debug!(path, "registration path is not absolute");
            return Vec::new();
        }

        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };

        let candidates: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.catalog.id.as_str().starts_with(&prefix))
            .collect();

        let registrations: Vec<CatalogRegistration> = candidates
            .iter()
            .filter(|entry| {
                !candidates
                    .iter()
                    .any(|other| entry.catalog.id.is_nested_under(&other.catalog.id))
            })
            .map(|entry| CatalogRegistration::new(entry.catalog.id.clone(), &entry.description))
            .collect();

        debug!(path, count = registrations.len(), "listed registrations");
        registrations
    }

    /// Returns the entry registered under `catalog_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCatalog`] if nothing is registered
    /// under that identifier.
    pub fn entry(&self, catalog_id: &str) -> Result<&CatalogEntry> {
        self.index
            .get(catalog_id)
            .map(|&position| &self.entries[position])
            .ok_or_else(|| {
                CatalogError::UnknownCatalog {
                    id: catalog_id.to_string(),
                }
                .into()
            })
    }

    /// Returns the full schema of a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCatalog`] for unregistered identifiers.
    pub fn get_catalog(&self, catalog_id: &str) -> Result<&ResourceCatalog> {
        self.entry(catalog_id).map(|entry| &entry.catalog)
    }

    /// Returns the overall coverage of a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCatalog`] for unregistered identifiers.
    pub fn get_time_range(&self, catalog_id: &str) -> Result<TimeRange> {
        self.entry(catalog_id).map(|entry| entry.time_range)
    }

    /// Returns the fraction of `[begin, end)` the catalog can serve.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCatalog`] for unregistered identifiers
    /// and [`ReadError::InvalidWindow`](crate::error::ReadError::InvalidWindow)
    /// if `begin >= end`.
    pub fn get_availability(&self, catalog_id: &str, begin: u64, end: u64) -> Result<f64> {
        let entry = self.entry(catalog_id)?;
        entry.time_range.coverage_of(&TimeRange::new(begin, end))
    }

    /// Returns `true` if `catalog_id` is registered.
    pub fn contains(&self, catalog_id: &CatalogId) -> bool {
        self.index.contains_key(catalog_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Resource;
    use crate::error::StrataError;
    use crate::representation::{DataType, Representation};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn catalog(id: &str) -> ResourceCatalog {
        let representation = Representation::new(DataType::Float64, Duration::from_secs(1)).unwrap();
        let resource = Resource::new("resource1", None, ["g"], vec![representation]).unwrap();
        ResourceCatalog::new(
            CatalogId::parse(id).unwrap(),
            BTreeMap::<String, String>::new(),
            vec![resource],
        )
        .unwrap()
    }

    fn registry(ids: &[&str]) -> CatalogRegistry {
        CatalogRegistry::new(
            ids.iter()
                .map(|id| CatalogEntry::new(catalog(id), format!("Test catalog {id}.")))
                .collect(),
        )
        .unwrap()
    }

    fn ids(registrations: &[CatalogRegistration]) -> Vec<&str> {
        registrations.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_root_lists_top_level_catalogs() {
        let registry = registry(&["/X", "/A/B/C/D", "/A/B/C", "/A/B/C/D/E"]);
        assert_eq!(ids(&registry.list_registrations("/")), vec!["/A/B/C", "/X"]);
    }

    #[test]
    fn test_drill_down() {
        let registry = registry(&["/X", "/A/B/C/D", "/A/B/C", "/A/B/C/D/E"]);

        assert_eq!(ids(&registry.list_registrations("/A")), vec!["/A/B/C"]);
        assert_eq!(ids(&registry.list_registrations("/A/")), vec!["/A/B/C"]);
        assert_eq!(ids(&registry.list_registrations("/A/B/C")), vec!["/A/B/C/D"]);
        assert_eq!(ids(&registry.list_registrations("/A/B/C/D/")), vec!["/A/B/C/D/E"]);
        assert!(registry.list_registrations("/A/B/C/D/E").is_empty());
    }

    #[test]
    fn test_prefix_matching_respects_segments() {
        let registry = registry(&["/A/BC", "/A/B/C"]);
        assert_eq!(ids(&registry.list_registrations("/A/B")), vec!["/A/B/C"]);
    }

    #[test]
    fn test_unknown_path_is_empty_not_error() {
        let registry = registry(&["/A/B/C"]);
        assert!(registry.list_registrations("/unknown").is_empty());
        assert!(registry.list_registrations("relative").is_empty());
        assert!(registry.list_registrations("").is_empty());
        assert!(CatalogRegistry::default().list_registrations("/").is_empty());
    }

    #[test]
    fn test_registration_carries_description() {
        let registry = registry(&["/A/B/C"]);
        let registrations = registry.list_registrations("/");
        assert_eq!(registrations[0].description, "Test catalog /A/B/C.");
    }

    #[test]
    fn test_get_catalog_unknown() {
        let registry = registry(&["/A/B/C"]);
        assert!(registry.get_catalog("/A/B/C").is_ok());

        let err = registry.get_catalog("/unknown").unwrap_err();
        assert!(matches!(
            err,
            StrataError::Catalog(CatalogError::UnknownCatalog { ref id }) if id == "/unknown"
        ));
        assert!(registry.get_time_range("/unknown").is_err());
        assert!(registry.get_availability("/unknown", 0, 1).is_err());
    }

    #[test]
    fn test_rejects_duplicates_and_bad_ranges() {
        let entries = vec![
            CatalogEntry::new(catalog("/A"), "first"),
            CatalogEntry::new(catalog("/A"), "second"),
        ];
        assert!(matches!(
            CatalogRegistry::new(entries),
            Err(StrataError::Catalog(CatalogError::DuplicateCatalog { .. }))
        ));

        let entries =
            vec![CatalogEntry::new(catalog("/A"), "a").with_time_range(TimeRange::new(10, 5))];
        assert!(CatalogRegistry::new(entries).is_err());
    }

    #[test]
    fn test_time_range_and_availability() {
        let registry = CatalogRegistry::new(vec![
            CatalogEntry::new(catalog("/open"), "open"),
            CatalogEntry::new(catalog("/bounded"), "bounded")
                .with_time_range(TimeRange::new(1_000, 2_000)),
        ])
        .unwrap();

        assert_eq!(registry.get_time_range("/open").unwrap(), TimeRange::UNBOUNDED);
        assert_eq!(registry.get_availability("/open", 5, 10).unwrap(), 1.0);

        assert_eq!(registry.get_availability("/bounded", 1_200, 1_800).unwrap(), 1.0);
        assert_eq!(registry.get_availability("/bounded", 0, 2_000).unwrap(), 0.5);
        assert_eq!(registry.get_availability("/bounded", 3_000, 4_000).unwrap(), 0.0);
        assert!(registry.get_availability("/bounded", 2_000, 1_000).is_err());
    }
}
