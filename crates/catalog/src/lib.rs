//! `almox-catalog`: materials catalog collaborator boundary.
//!
//! The engine never computes stock or catalog data itself; it only needs the
//! material → type → category resolution to evaluate category scoping.

pub mod lookup;

pub use lookup::{CatalogError, CategoryId, CategoryLookup, InMemoryCatalog, MaterialId, MaterialTypeId};
