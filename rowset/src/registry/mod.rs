use crate::dataset::{Dataset, DatasetMut, MasterContext, Services};
use crate::error::{Result, RowsetError};
use crate::relation::Relation;
use crate::row::{Row, RowState};
use crate::schema::{Dictionary, ObjectDefinition, RelationDefinition};
use crate::transport::{EnumProvider, StaticEnums, Transport};
use std::collections::BTreeMap;

/// The main entry point: owns every dataset of a form together with the
/// transport and enumeration collaborators, and hands out [`DatasetMut`]
/// handles for operations that cross dataset boundaries.
pub struct Registry {
    pub(crate) datasets: BTreeMap<String, Dataset>,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) enums: Box<dyn EnumProvider>,
}

impl Registry {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Registry {
            datasets: BTreeMap::new(),
            transport: Box::new(transport),
            enums: Box::new(StaticEnums::default()),
        }
    }

    pub fn with_enums(mut self, enums: impl EnumProvider + 'static) -> Self {
        self.enums = Box::new(enums);
        self
    }

    /// Build every object and relation of a dictionary. Dictionary enums
    /// become the enumeration provider.
    pub fn from_dictionary(dictionary: &Dictionary, transport: impl Transport + 'static) -> Result<Self> {
        let mut registry =
            Registry::new(transport).with_enums(StaticEnums::new(dictionary.enums.clone()));
        for object in &dictionary.objects {
            registry.add(object.clone())?;
        }
        for relation in &dictionary.relations {
            registry.add_relation(relation)?;
        }
        log::debug!(
            "Registry built: {} datasets, {} relations",
            dictionary.objects.len(),
            dictionary.relations.len()
        );
        Ok(registry)
    }

    pub fn add(&mut self, definition: ObjectDefinition) -> Result<&mut Dataset> {
        if self.datasets.contains_key(&definition.obj_id) {
            return Err(RowsetError::Usage(format!(
                "dataset '{}' is already registered",
                definition.obj_id
            )));
        }
        let id = definition.obj_id.clone();
        let dataset = Dataset::new(definition)?;
        Ok(self.datasets.entry(id).or_insert(dataset))
    }

    /// Unregister a dataset and detach it from its relations
    pub fn remove(&mut self, id: &str) -> Result<Dataset> {
        let dataset = self
            .datasets
            .remove(id)
            .ok_or_else(|| RowsetError::UnknownDataset(id.to_string()))?;
        if let Some(master) = dataset.master_id().and_then(|m| self.datasets.get_mut(m)) {
            master.remove_child(id);
        }
        for child in dataset.detail_ids() {
            if let Some(detail) = self.datasets.get_mut(child) {
                detail.set_parent(None);
            }
        }
        Ok(dataset)
    }

    pub fn get(&self, id: &str) -> Result<&Dataset> {
        self.datasets
            .get(id)
            .ok_or_else(|| RowsetError::UnknownDataset(id.to_string()))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Dataset> {
        self.datasets
            .get_mut(id)
            .ok_or_else(|| RowsetError::UnknownDataset(id.to_string()))
    }

    /// Handle for operations that may reach related datasets or the transport
    pub fn dataset(&mut self, id: &str) -> Result<DatasetMut<'_>> {
        self.get(id)?;
        Ok(DatasetMut::new(self, id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    /// Link a master and a detail dataset. Registering the same pair twice
    /// is a no-op; a second master for one detail is a usage error.
    pub fn add_relation(&mut self, definition: &RelationDefinition) -> Result<()> {
        if definition.master == definition.detail {
            return Err(RowsetError::Usage(format!(
                "dataset '{}' cannot be its own detail",
                definition.master
            )));
        }

        let master = self.get(&definition.master)?;
        let detail = self.get(&definition.detail)?;
        if master.detail_ids().iter().any(|c| *c == definition.detail) {
            return Ok(());
        }
        if let Some(existing) = detail.master_id() {
            return Err(RowsetError::Usage(format!(
                "dataset '{}' already has master '{existing}'",
                definition.detail
            )));
        }

        let relation = Relation::new(
            master,
            detail,
            &definition.master_key,
            &definition.detail_key,
            definition.detail_required,
        )?;
        self.get_mut(&definition.detail)?.set_parent(Some(relation));
        self.get_mut(&definition.master)?.add_child(&definition.detail);
        Ok(())
    }

    /// Live and deleted rows of a dataset plus detail rows parked on every
    /// row of its master.
    pub fn all_rows(&self, id: &str) -> Result<Vec<&Row>> {
        let dataset = self.get(id)?;
        let mut rows: Vec<&Row> = dataset.deleted_rows().chain(dataset.rows()).collect();
        for parked in self.parked_stores(dataset)? {
            rows.extend(parked.live());
        }
        Ok(rows)
    }

    /// Rows with pending changes, including detail rows parked on master rows
    pub fn changes(&self, id: &str) -> Result<Vec<&Row>> {
        let dataset = self.get(id)?;
        let mut rows = dataset.local_changes();
        for parked in self.parked_stores(dataset)? {
            rows.extend(parked.live().filter(|r| r.state().is_changed()));
            rows.extend(parked.deleted().filter(|r| r.state() == RowState::Deleted));
        }
        Ok(rows)
    }

    fn parked_stores<'r>(&'r self, dataset: &Dataset) -> Result<Vec<&'r crate::row::RowStore>> {
        let Some(master) = dataset.master_id() else {
            return Ok(Vec::new());
        };
        Ok(self
            .all_rows(master)?
            .into_iter()
            .filter_map(|row| row.details().get(dataset.id()))
            .collect())
    }

    pub(crate) fn master_context(&self, id: &str) -> Result<MasterContext> {
        let dataset = self.get(id)?;
        let Some(relation) = dataset.parent_relation() else {
            return Ok(MasterContext::default());
        };
        let master = self.get(relation.master())?;
        let row_data = master
            .current_row()
            .and_then(|row| master.row(row))
            .map(|row| row.get_data(master.columns()))
            .unwrap_or_default();
        let key_values = relation
            .detail_keys()
            .iter()
            .map(|key| (key.clone(), relation.detail_value(master, key)))
            .collect();

        Ok(MasterContext {
            row_data: Some(row_data),
            key_values,
        })
    }

    /// Disjoint borrows of one dataset and the collaborators
    pub(crate) fn editor_parts(&mut self, id: &str) -> Result<(&mut Dataset, Services<'_>)> {
        let dataset = self
            .datasets
            .get_mut(id)
            .ok_or_else(|| RowsetError::UnknownDataset(id.to_string()))?;
        Ok((
            dataset,
            Services {
                transport: self.transport.as_mut(),
                enums: self.enums.as_ref(),
            },
        ))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("datasets", &self.datasets.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_dictionary_str;
    use crate::transport::MemoryTransport;

    const DICTIONARY: &str = r#"
objects:
  - objId: orders
    columns:
      - { fieldName: orderId, dataType: number, isPrimaryKey: true }
  - objId: order_lines
    columns:
      - { fieldName: orderId, dataType: number }
  - objId: notes
    columns:
      - { fieldName: orderId, dataType: number }
relations:
  - { master: orders, detail: order_lines, masterKey: orderId, detailKey: orderId }
"#;

    fn registry() -> Registry {
        let dictionary = parse_dictionary_str(DICTIONARY).unwrap();
        Registry::from_dictionary(&dictionary, MemoryTransport::new()).unwrap()
    }

    #[test]
    fn test_from_dictionary_links_relations() {
        let registry = registry();
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["notes", "order_lines", "orders"]);
        assert_eq!(registry.get("orders").unwrap().detail_ids(), &["order_lines".to_string()]);
        assert_eq!(registry.get("order_lines").unwrap().master_id(), Some("orders"));
    }

    #[test]
    fn test_duplicate_relation_is_noop() {
        let mut registry = registry();
        let relation = RelationDefinition {
            master: "orders".into(),
            detail: "order_lines".into(),
            master_key: "orderId".into(),
            detail_key: "orderId".into(),
            detail_required: false,
        };
        registry.add_relation(&relation).unwrap();
        assert_eq!(registry.get("orders").unwrap().detail_ids().len(), 1);
    }

    #[test]
    fn test_second_master_is_usage_error() {
        let mut registry = registry();
        let relation = RelationDefinition {
            master: "notes".into(),
            detail: "order_lines".into(),
            master_key: "orderId".into(),
            detail_key: "orderId".into(),
            detail_required: false,
        };
        let err = registry.add_relation(&relation).unwrap_err();
        assert!(matches!(err, RowsetError::Usage(_)));
    }

    #[test]
    fn test_unknown_dataset() {
        let mut registry = registry();
        assert!(matches!(registry.get("nope"), Err(RowsetError::UnknownDataset(_))));
        assert!(registry.dataset("nope").is_err());
        assert!(matches!(
            registry.add(ObjectDefinition::new("orders", Vec::new())),
            Err(RowsetError::Usage(_))
        ));
    }

    #[test]
    fn test_remove_detaches_relations() {
        let mut registry = registry();
        registry.remove("order_lines").unwrap();
        assert!(registry.get("orders").unwrap().detail_ids().is_empty());
    }
}
