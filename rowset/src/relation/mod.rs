use crate::dataset::{Dataset, DetailRelationSchema};
use crate::error::{Result, RowsetError};
use crate::event::JsonMap;
use crate::schema::RefType;
use crate::value::{Decimal, Value};
use std::collections::BTreeMap;

/// Master/detail link between two datasets: positional key pairs, the
/// detail-required flag and the master columns that total a detail column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    master: String,
    detail: String,
    master_keys: Vec<String>,
    detail_keys: Vec<String>,
    /// detail column -> master total column
    total_map: BTreeMap<String, String>,
    detail_required: bool,
}

fn split_keys(keys: &str) -> Vec<String> {
    keys.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

impl Relation {
    /// Build and check a relation. Both key lists must be the same non-zero
    /// length and name existing columns.
    pub fn new(
        master: &Dataset,
        detail: &Dataset,
        master_key: &str,
        detail_key: &str,
        detail_required: bool,
    ) -> Result<Self> {
        let master_keys = split_keys(master_key);
        let detail_keys = split_keys(detail_key);
        if master_keys.is_empty() || master_keys.len() != detail_keys.len() {
            return Err(RowsetError::Usage(format!(
                "relation {} -> {} needs key lists of equal length, got '{master_key}' and '{detail_key}'",
                master.id(),
                detail.id()
            )));
        }
        for key in &master_keys {
            master.column_index(key)?;
        }
        for key in &detail_keys {
            detail.column_index(key)?;
        }

        let total_map = master
            .columns()
            .iter()
            .filter(|c| c.definition().ref_type == RefType::Total)
            .filter(|c| c.definition().ref_obj.as_deref() == Some(detail.id()))
            .filter_map(|c| {
                let source = c.definition().ref_field.clone()?;
                Some((source, c.field_name().to_string()))
            })
            .collect();

        Ok(Relation {
            master: master.id().to_string(),
            detail: detail.id().to_string(),
            master_keys,
            detail_keys,
            total_map,
            detail_required,
        })
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn master_keys(&self) -> &[String] {
        &self.master_keys
    }

    pub fn detail_keys(&self) -> &[String] {
        &self.detail_keys
    }

    pub fn detail_required(&self) -> bool {
        self.detail_required
    }

    pub fn set_detail_required(&mut self, value: bool) {
        self.detail_required = value;
    }

    pub fn is_detail_key(&self, column: &str) -> bool {
        self.detail_keys.iter().any(|k| k == column)
    }

    /// Key pairs as `(master column, detail column)`
    pub fn key_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.master_keys
            .iter()
            .zip(&self.detail_keys)
            .map(|(m, d)| (m.as_str(), d.as_str()))
    }

    pub fn schema(&self) -> DetailRelationSchema {
        DetailRelationSchema {
            master_key: self.master_keys.join(","),
            detail_key: self.detail_keys.join(","),
            ui_obj_id: self.detail.clone(),
        }
    }

    /// Detail filter for a master row in wire form
    pub fn params(&self, master_row: &JsonMap) -> JsonMap {
        self.key_pairs()
            .map(|(m, d)| {
                let value = master_row.get(m).cloned().unwrap_or(serde_json::Value::Null);
                (d.to_string(), value)
            })
            .collect()
    }

    /// Value the master's current row gives a detail key column. Null for
    /// non-key columns or when the master has no current row.
    pub fn detail_value(&self, master: &Dataset, detail_column: &str) -> Value {
        let Some((master_column, _)) = self.key_pairs().find(|(_, d)| *d == detail_column) else {
            return Value::Null;
        };
        master
            .current_row()
            .and_then(|row| master.value(row, master_column).ok())
            .cloned()
            .unwrap_or_default()
    }

    /// Master total column fed by a detail column
    pub fn total_column(&self, detail_column: &str) -> Option<&str> {
        self.total_map.get(detail_column).map(String::as_str)
    }

    pub fn total_columns(&self) -> &BTreeMap<String, String> {
        &self.total_map
    }

    /// Sum of a detail column over the detail's live rows
    pub fn total_value(&self, detail: &Dataset, detail_column: &str) -> Result<Decimal> {
        let index = detail.column_index(detail_column)?;
        let values = detail.rows().filter_map(|r| r.value(index).as_decimal());
        Decimal::checked_sum(values)
            .ok_or_else(|| RowsetError::Overflow(format!("total of {}.{detail_column}", detail.id())))
    }
}
