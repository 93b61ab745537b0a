//! Plan-level metadata over an opened [`ArrayStore`].

use std::collections::BTreeMap;

use ndarray::Array2;

use crate::{ArrayStore, FlowAreaAttributes, StoreError, layout};

/// A plan results file: the store plus its domain attribute table.
///
/// Holds only a borrow of the store so the same opened container can feed
/// both this summary view and the per-domain mesh loaders.
pub struct PlanFile<'a> {
    store: &'a dyn ArrayStore,
    flow_areas: Vec<FlowAreaAttributes>,
}

impl<'a> PlanFile<'a> {
    /// Reads the 2D flow area table and wraps the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingPath`] if the plan has no 2D flow areas.
    pub fn open(store: &'a dyn ArrayStore) -> Result<Self, StoreError> {
        let flow_areas = store.flow_area_table()?;
        log::info!("Plan contains {} 2D flow area(s)", flow_areas.len());
        if flow_areas.len() == 1 {
            log::debug!("Single domain found");
        }
        Ok(Self { store, flow_areas })
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &'a dyn ArrayStore {
        self.store
    }

    /// Domain names in table order.
    #[must_use]
    pub fn domains(&self) -> Vec<&str> {
        self.flow_areas.iter().map(|a| a.name.as_str()).collect()
    }

    /// Attribute row for one domain.
    #[must_use]
    pub fn flow_area(&self, domain: &str) -> Option<&FlowAreaAttributes> {
        self.flow_areas.iter().find(|a| a.name == domain)
    }

    /// `/Plan Data/Plan Information` attributes rendered as text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingPath`] if the group is absent.
    pub fn plan_information(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.text_attributes(&layout::plan_data_path(layout::plan::INFORMATION))
    }

    /// `/Plan Data/Plan Parameters` attributes rendered as text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingPath`] if the group is absent.
    pub fn plan_parameters(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.text_attributes(&layout::plan_data_path(layout::plan::PARAMETERS))
    }

    /// Unsteady run summary attributes (compute time, volume error, ...).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingPath`] if the group is absent.
    pub fn summary(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.text_attributes(layout::UNSTEADY_SUMMARY)
    }

    /// Perimeter point arrays of every domain, in table order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingPath`] if any domain lacks a perimeter.
    pub fn perimeters(&self) -> Result<Vec<(String, Array2<f64>)>, StoreError> {
        self.flow_areas
            .iter()
            .map(|area| {
                let path = layout::geometry_path(&area.name, layout::geometry::PERIMETER);
                Ok((area.name.clone(), self.store.read_f64_2d(&path)?))
            })
            .collect()
    }

    fn text_attributes(&self, path: &str) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self
            .store
            .attributes(path)?
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::{AttrValue, MemoryStore};

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_flow_area(FlowAreaAttributes {
                name: "Upper".to_string(),
                spacing_dx: 20.0,
                spacing_dy: 20.0,
            })
            .with_flow_area(FlowAreaAttributes {
                name: "Lower".to_string(),
                spacing_dx: 40.0,
                spacing_dy: 60.0,
            })
            .with_f64(
                layout::geometry_path("Upper", layout::geometry::PERIMETER),
                array![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
            )
            .with_f64(
                layout::geometry_path("Lower", layout::geometry::PERIMETER),
                array![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0]],
            )
            .with_attribute(
                layout::UNSTEADY_SUMMARY,
                "Computation Time Total",
                AttrValue::Text("00:12:31".to_string()),
            )
            .with_attribute(
                layout::UNSTEADY_SUMMARY,
                "Vol Accounting Error",
                AttrValue::Float(0.25),
            )
    }

    #[test]
    fn lists_domains_in_table_order() {
        let store = store();
        let plan = PlanFile::open(&store).unwrap();
        assert_eq!(plan.domains(), vec!["Upper", "Lower"]);
        let lower = plan.flow_area("Lower").unwrap();
        assert!((lower.mean_cell_size() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_renders_attributes_as_text() {
        let store = store();
        let plan = PlanFile::open(&store).unwrap();
        let summary = plan.summary().unwrap();
        assert_eq!(summary["Vol Accounting Error"], "0.25");
        assert_eq!(summary["Computation Time Total"], "00:12:31");
    }

    #[test]
    fn missing_plan_information_is_an_error() {
        let store = store();
        let plan = PlanFile::open(&store).unwrap();
        assert!(plan.plan_information().unwrap_err().is_missing());
    }

    #[test]
    fn reads_every_perimeter() {
        let store = store();
        let plan = PlanFile::open(&store).unwrap();
        let perimeters = plan.perimeters().unwrap();
        assert_eq!(perimeters.len(), 2);
        assert_eq!(perimeters[1].1.nrows(), 3);
    }

    #[test]
    fn plan_without_flow_areas_fails_to_open() {
        let store = MemoryStore::new();
        assert!(PlanFile::open(&store).is_err());
    }
}
