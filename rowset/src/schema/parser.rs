use super::types::{Dictionary, RelationDefinition};
use crate::error::{Result, RowsetError};
use std::collections::HashSet;
use std::path::Path;

/// Parse a dictionary file (YAML or JSON) into a Dictionary
pub fn parse_dictionary(path: &Path) -> Result<Dictionary> {
    let content = std::fs::read_to_string(path)?;
    parse_dictionary_str(&content)
}

/// Parse a dictionary YAML string into a Dictionary and check it for
/// duplicate object ids, duplicate field names and dangling relations.
pub fn parse_dictionary_str(content: &str) -> Result<Dictionary> {
    let dictionary: Dictionary = serde_yaml::from_str(content)?;
    check_dictionary(&dictionary)?;
    Ok(dictionary)
}

fn check_dictionary(dictionary: &Dictionary) -> Result<()> {
    let mut ids = HashSet::new();
    for object in &dictionary.objects {
        if !ids.insert(object.obj_id.as_str()) {
            return Err(RowsetError::Schema(format!(
                "Object '{}' is defined twice",
                object.obj_id
            )));
        }

        let mut fields = HashSet::new();
        for column in &object.columns {
            if !fields.insert(column.field_name.as_str()) {
                return Err(RowsetError::Schema(format!(
                    "Field '{}' is defined twice on '{}'",
                    column.field_name, object.obj_id
                )));
            }
        }
    }

    for relation in &dictionary.relations {
        check_relation(dictionary, relation)?;
    }

    Ok(())
}

fn check_relation(dictionary: &Dictionary, relation: &RelationDefinition) -> Result<()> {
    for id in [&relation.master, &relation.detail] {
        if dictionary.object(id).is_none() {
            return Err(RowsetError::Schema(format!(
                "Relation {} -> {} references unknown object '{id}'",
                relation.master, relation.detail
            )));
        }
    }
    Ok(())
}
