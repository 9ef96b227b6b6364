use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinate::{Coordinate, CoordinateError};

/// A pre-registered campus point offered for selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LocationRecord", into = "LocationRecord")]
pub struct NamedLocation {
    pub id: String,
    pub name: String,
    pub category: String,
    pub coordinate: Coordinate,
    pub description: String,
}

/// Flat on-disk shape of a catalog entry.
#[derive(Serialize, Deserialize)]
struct LocationRecord {
    id: String,
    name: String,
    category: String,
    lat: f64,
    lng: f64,
    #[serde(default)]
    description: String,
}

impl TryFrom<LocationRecord> for NamedLocation {
    type Error = CoordinateError;

    fn try_from(record: LocationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            coordinate: Coordinate::new(record.lat, record.lng)?,
            id: record.id,
            name: record.name,
            category: record.category,
            description: record.description,
        })
    }
}

impl From<NamedLocation> for LocationRecord {
    fn from(location: NamedLocation) -> Self {
        Self {
            lat: location.coordinate.lat(),
            lng: location.coordinate.lng(),
            id: location.id,
            name: location.name,
            category: location.category,
            description: location.description,
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse catalog: {0}")]
    Parse(String),
    #[error("location id {0:?} appears more than once")]
    DuplicateId(String),
    #[error("location {id:?} has unknown category {category:?}")]
    UnknownCategory { id: String, category: String },
    #[error("location at index {0} has an empty id")]
    EmptyId(usize),
}

#[derive(Deserialize)]
struct CatalogFile {
    categories: Vec<String>,
    locations: Vec<NamedLocation>,
}

/// The immutable set of selectable points, loaded once at startup.
#[derive(Debug, Clone)]
pub struct LocationCatalog {
    categories: Vec<String>,
    locations: Vec<NamedLocation>,
    index: HashMap<String, usize>,
}

impl LocationCatalog {
    pub fn new(categories: Vec<String>, locations: Vec<NamedLocation>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(locations.len());

        for (i, location) in locations.iter().enumerate() {
            if location.id.trim().is_empty() {
                return Err(CatalogError::EmptyId(i));
            }
            if !categories.contains(&location.category) {
                return Err(CatalogError::UnknownCategory {
                    id: location.id.clone(),
                    category: location.category.clone(),
                });
            }
            if index.insert(location.id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateId(location.id.clone()));
            }
        }

        Ok(Self {
            categories,
            locations,
            index,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::new(file.categories, file.locations)
    }

    pub fn get(&self, id: &str) -> Option<&NamedLocation> {
        self.index.get(id).map(|&i| &self.locations[i])
    }

    pub fn locations(&self) -> &[NamedLocation] {
        &self.locations
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a NamedLocation> + 'a {
        self.locations.iter().filter(move |l| l.category == category)
    }

    /// Case-insensitive substring match on the location name.
    pub fn search(&self, query: &str) -> Vec<&NamedLocation> {
        let query = query.trim().to_lowercase();
        self.locations
            .iter()
            .filter(|l| l.name.to_lowercase().contains(&query))
            .collect()
    }

    /// Every location except `excluded`, in catalog order.
    pub fn offered_excluding<'a>(&'a self, excluded: Option<&'a str>) -> impl Iterator<Item = &'a NamedLocation> + 'a {
        self.locations.iter().filter(move |l| Some(l.id.as_str()) != excluded)
    }
}
