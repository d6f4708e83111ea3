use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use almox_core::AggregateId;

/// Material identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialId(pub AggregateId);

impl MaterialId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for MaterialId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Material type identifier (the middle link of material → type → category).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialTypeId(pub AggregateId);

impl MaterialTypeId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for MaterialTypeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Material category identifier, the unit of permission scoping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub AggregateId);

impl CategoryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        self.0.as_uuid()
    }
}

impl core::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog backend failed or timed out. Safe to retry with backoff.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Collaborator that resolves a material to its scoping category.
///
/// Returns `Ok(None)` when the material (or its type/category chain) is not
/// known; callers evaluating permissions fail closed on `None`.
pub trait CategoryLookup: Send + Sync {
    fn category_of(&self, material: MaterialId) -> Result<Option<CategoryId>, CatalogError>;
}

/// In-memory catalog for tests/dev.
///
/// Holds the two edges of the chain explicitly so fixtures can model a
/// material whose type exists but whose type has no category.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    material_types: RwLock<HashMap<MaterialId, MaterialTypeId>>,
    type_categories: RwLock<HashMap<MaterialTypeId, CategoryId>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_material(&self, material: MaterialId, material_type: MaterialTypeId) {
        if let Ok(mut map) = self.material_types.write() {
            map.insert(material, material_type);
        }
    }

    pub fn insert_type(&self, material_type: MaterialTypeId, category: CategoryId) {
        if let Ok(mut map) = self.type_categories.write() {
            map.insert(material_type, category);
        }
    }

    /// Convenience for fixtures: register the full chain in one call.
    pub fn insert_chain(
        &self,
        material: MaterialId,
        material_type: MaterialTypeId,
        category: CategoryId,
    ) {
        self.insert_material(material, material_type);
        self.insert_type(material_type, category);
    }
}

impl CategoryLookup for InMemoryCatalog {
    fn category_of(&self, material: MaterialId) -> Result<Option<CategoryId>, CatalogError> {
        let types = self
            .material_types
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        let Some(material_type) = types.get(&material) else {
            return Ok(None);
        };

        let categories = self
            .type_categories
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        Ok(categories.get(material_type).copied())
    }
}

impl<C> CategoryLookup for &C
where
    C: CategoryLookup + ?Sized,
{
    fn category_of(&self, material: MaterialId) -> Result<Option<CategoryId>, CatalogError> {
        (**self).category_of(material)
    }
}

impl<C> CategoryLookup for std::sync::Arc<C>
where
    C: CategoryLookup + ?Sized,
{
    fn category_of(&self, material: MaterialId) -> Result<Option<CategoryId>, CatalogError> {
        (**self).category_of(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_material_through_type_to_category() {
        let catalog = InMemoryCatalog::new();
        let material = MaterialId::new(AggregateId::new());
        let material_type = MaterialTypeId::new(AggregateId::new());
        let category = CategoryId::new(AggregateId::new());
        catalog.insert_chain(material, material_type, category);

        assert_eq!(catalog.category_of(material), Ok(Some(category)));
    }

    #[test]
    fn unknown_material_resolves_to_none() {
        let catalog = InMemoryCatalog::new();
        let material = MaterialId::new(AggregateId::new());
        assert_eq!(catalog.category_of(material), Ok(None));
    }

    #[test]
    fn type_without_category_resolves_to_none() {
        let catalog = InMemoryCatalog::new();
        let material = MaterialId::new(AggregateId::new());
        let material_type = MaterialTypeId::new(AggregateId::new());
        catalog.insert_material(material, material_type);

        assert_eq!(catalog.category_of(material), Ok(None));
    }
}
