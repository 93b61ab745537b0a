//! In-memory [`ArrayStore`] keyed by dataset path.
//!
//! Groups are implicit: a group exists whenever some dataset or attribute
//! set lives underneath it, the same way HDF5 paths behave.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array2;

use crate::{ArrayStore, AttrValue, FlowAreaAttributes, StoreError, layout};

#[derive(Debug, Clone)]
enum Dataset {
    Float(Array2<f64>),
    Int(Array2<i64>),
}

/// A [`BTreeMap`]-backed array store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: BTreeMap<String, Dataset>,
    attributes: BTreeMap<String, BTreeMap<String, AttrValue>>,
    flow_areas: Vec<FlowAreaAttributes>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a floating point dataset.
    pub fn insert_f64(&mut self, path: impl Into<String>, data: Array2<f64>) {
        self.datasets.insert(path.into(), Dataset::Float(data));
    }

    /// Inserts an integer dataset.
    pub fn insert_i64(&mut self, path: impl Into<String>, data: Array2<i64>) {
        self.datasets.insert(path.into(), Dataset::Int(data));
    }

    /// Sets one attribute on the object at `path`.
    pub fn insert_attribute(
        &mut self,
        path: impl Into<String>,
        name: impl Into<String>,
        value: AttrValue,
    ) {
        self.attributes
            .entry(path.into())
            .or_default()
            .insert(name.into(), value);
    }

    /// Adds a row to the flow area attribute table.
    pub fn insert_flow_area(&mut self, attrs: FlowAreaAttributes) {
        self.flow_areas.retain(|a| a.name != attrs.name);
        self.flow_areas.push(attrs);
    }

    /// Builder form of [`MemoryStore::insert_f64`].
    #[must_use]
    pub fn with_f64(mut self, path: impl Into<String>, data: Array2<f64>) -> Self {
        self.insert_f64(path, data);
        self
    }

    /// Builder form of [`MemoryStore::insert_i64`].
    #[must_use]
    pub fn with_i64(mut self, path: impl Into<String>, data: Array2<i64>) -> Self {
        self.insert_i64(path, data);
        self
    }

    /// Builder form of [`MemoryStore::insert_attribute`].
    #[must_use]
    pub fn with_attribute(
        mut self,
        path: impl Into<String>,
        name: impl Into<String>,
        value: AttrValue,
    ) -> Self {
        self.insert_attribute(path, name, value);
        self
    }

    /// Builder form of [`MemoryStore::insert_flow_area`].
    #[must_use]
    pub fn with_flow_area(mut self, attrs: FlowAreaAttributes) -> Self {
        self.insert_flow_area(attrs);
        self
    }

    fn dataset(&self, path: &str) -> Result<&Dataset, StoreError> {
        self.datasets.get(path).ok_or_else(|| StoreError::MissingPath {
            path: path.to_string(),
        })
    }

    fn paths(&self) -> impl Iterator<Item = &str> {
        self.datasets
            .keys()
            .chain(self.attributes.keys())
            .map(String::as_str)
    }
}

impl ArrayStore for MemoryStore {
    #[allow(clippy::cast_precision_loss)]
    fn read_f64_2d(&self, path: &str) -> Result<Array2<f64>, StoreError> {
        match self.dataset(path)? {
            Dataset::Float(data) => Ok(data.clone()),
            Dataset::Int(data) => Ok(data.mapv(|v| v as f64)),
        }
    }

    fn read_i64_2d(&self, path: &str) -> Result<Array2<i64>, StoreError> {
        match self.dataset(path)? {
            Dataset::Int(data) => Ok(data.clone()),
            Dataset::Float(_) => Err(StoreError::DataType {
                path: path.to_string(),
                expected: "integer",
            }),
        }
    }

    fn list(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let members: BTreeSet<String> = self
            .paths()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        if members.is_empty() {
            return Err(StoreError::MissingPath {
                path: path.to_string(),
            });
        }

        Ok(members.into_iter().collect())
    }

    fn attributes(&self, path: &str) -> Result<BTreeMap<String, AttrValue>, StoreError> {
        if let Some(attrs) = self.attributes.get(path) {
            return Ok(attrs.clone());
        }
        if self.exists(path) {
            return Ok(BTreeMap::new());
        }
        Err(StoreError::MissingPath {
            path: path.to_string(),
        })
    }

    fn exists(&self, path: &str) -> bool {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.paths().any(|p| p == path || p.starts_with(&prefix))
            || (path == layout::GEOMETRY_ATTRIBUTES && !self.flow_areas.is_empty())
    }

    fn flow_area_table(&self) -> Result<Vec<FlowAreaAttributes>, StoreError> {
        if self.flow_areas.is_empty() {
            return Err(StoreError::MissingPath {
                path: layout::GEOMETRY_ATTRIBUTES.to_string(),
            });
        }
        Ok(self.flow_areas.clone())
    }
}
