use crate::error::{Result, RowsetError};
use crate::row::RowId;
use crate::schema::{ColumnDefinition, DataType, EnumItem, ProcParaType, RefType};
use crate::value::{datetime_from_millis, parse_bool_token, parse_datetime, Decimal, Value};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

/// One reference candidate. Keys are lower-cased field names.
pub type RefItem = BTreeMap<String, Value>;

/// Entry of a rendered candidate list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefListEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
struct RefCache {
    item: Option<RefItem>,
    /// Row the cached item was resolved for
    owner: Option<RowId>,
    items: Vec<RefItem>,
}

/// Runtime column: the immutable definition plus the compiled rule,
/// the reference cache and the stored-procedure parameter value.
#[derive(Debug, Clone)]
pub struct Column {
    def: ColumnDefinition,
    index: usize,
    rule: Option<Regex>,
    read_only: bool,
    para_value: Value,
    reference: RefCache,
}

impl Column {
    pub fn new(def: ColumnDefinition, index: usize) -> Result<Self> {
        let rule = match def.set_rule.as_deref().filter(|r| !r.is_empty()) {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                RowsetError::Schema(format!(
                    "Invalid rule on column '{}': {e}",
                    def.field_name
                ))
            })?),
            None => None,
        };
        let para_value = def
            .default_value
            .as_ref()
            .map(Value::from_json)
            .unwrap_or_default();

        Ok(Column {
            def,
            index,
            rule,
            read_only: false,
            para_value,
            reference: RefCache::default(),
        })
    }

    pub fn definition(&self) -> &ColumnDefinition {
        &self.def
    }

    pub fn field_name(&self) -> &str {
        &self.def.field_name
    }

    pub fn display_name(&self) -> &str {
        self.def.display_name()
    }

    /// Position of this column in its dataset
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data_type(&self) -> DataType {
        self.def.data_type
    }

    pub fn rule(&self) -> Option<&Regex> {
        self.rule.as_ref()
    }

    pub fn is_table_ref(&self) -> bool {
        matches!(self.def.ref_type, RefType::Table | RefType::Prop)
    }

    pub fn is_enum_ref(&self) -> bool {
        self.def.ref_type == RefType::Enum
    }

    pub fn is_none_ref(&self) -> bool {
        self.def.ref_type == RefType::None
    }

    pub fn is_total(&self) -> bool {
        self.def.ref_type == RefType::Total
    }

    /// `other` is a property alias of this column, or this column is one of `other`
    pub fn is_alias_of(&self, other: &Column) -> bool {
        let names = |c: &Column, target: &Column| {
            c.def.ref_type == RefType::Prop
                && c.def.ref_obj.as_deref() == Some(target.field_name())
        };
        names(other, self) || names(self, other)
    }

    pub fn read_only(&self) -> bool {
        !self.def.is_editable || self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn default_value(&self) -> Value {
        self.def
            .default_value
            .as_ref()
            .map(Value::from_json)
            .unwrap_or_default()
    }

    pub fn para_value(&self) -> &Value {
        &self.para_value
    }

    pub fn set_para_value(&mut self, value: Value) {
        self.para_value = value;
    }

    /// IN and INOUT parameters are sent with stored-procedure requests
    pub fn is_input_param(&self) -> bool {
        matches!(self.def.proc_para_type, ProcParaType::In | ProcParaType::InOut)
    }

    /// Coerce raw input to the column type. Unparseable numbers and dates are
    /// kept as text so the type check reports them.
    pub fn convert(&self, raw: Value) -> Value {
        match self.def.data_type {
            DataType::Boolean => match raw {
                Value::Null => Value::Null,
                Value::Boolean(b) => Value::Boolean(b),
                Value::Number(d) => Value::Boolean(d == Decimal::from_i64(1)),
                Value::String(s) if s.trim().is_empty() => Value::Null,
                Value::String(s) => Value::Boolean(parse_bool_token(&s)),
                Value::DateTime(_) => Value::Boolean(false),
            },
            DataType::Datetime => match raw {
                Value::String(s) => {
                    let s = s.trim();
                    if s.is_empty() {
                        Value::Null
                    } else if let Some(dt) = parse_datetime(s) {
                        Value::DateTime(dt)
                    } else if let Some(dt) = s.parse::<i64>().ok().and_then(datetime_from_millis) {
                        Value::DateTime(dt)
                    } else {
                        Value::String(s.to_string())
                    }
                }
                Value::Number(d) => d
                    .trunc_i64()
                    .and_then(datetime_from_millis)
                    .map(Value::DateTime)
                    .unwrap_or(Value::Null),
                other => other,
            },
            DataType::Number => match raw {
                Value::String(s) => {
                    let s = s.trim();
                    if s.is_empty() {
                        Value::Null
                    } else {
                        Decimal::parse(s)
                            .map(Value::Number)
                            .unwrap_or_else(|| Value::String(s.to_string()))
                    }
                }
                Value::Boolean(b) => Value::from(b as i64),
                other => other,
            },
            DataType::String => match raw {
                Value::Null => Value::Null,
                other => {
                    let text = other.to_string();
                    let mut text = text.trim();
                    if self.def.ref_obj.is_some() {
                        if let Some(sep) = self.def.ref_separator.as_deref().filter(|s| !s.is_empty()) {
                            if let Some(pos) = text.find(sep) {
                                text = &text[..pos];
                            }
                        }
                    }
                    Value::String(text.to_string())
                }
            },
        }
    }

    /// Display text: value, or value + separator + reference text
    pub fn text(&self, value: &Value, ref_text: Option<&str>) -> String {
        match ref_text.filter(|t| !t.is_empty()) {
            Some(ref_text) => format!(
                "{value}{}{ref_text}",
                self.def.ref_separator.as_deref().unwrap_or("")
            ),
            None => value.to_string(),
        }
    }

    pub fn ref_item(&self) -> Option<&RefItem> {
        self.reference.item.as_ref()
    }

    pub fn ref_owner(&self) -> Option<RowId> {
        self.reference.owner
    }

    pub fn set_ref_item(&mut self, item: Option<RefItem>, owner: Option<RowId>) {
        self.reference.owner = item.as_ref().and(owner);
        self.reference.item = item;
    }

    pub fn ref_items(&self) -> &[RefItem] {
        &self.reference.items
    }

    pub fn set_ref_items(&mut self, items: Vec<RefItem>) {
        self.reference.items = items;
    }

    pub fn clear_reference(&mut self) {
        self.reference = RefCache::default();
    }

    /// A field of the cached reference item; `refField` when `name` is `None`
    pub fn ref_value(&self, name: Option<&str>) -> Value {
        let name = name
            .or(self.def.ref_field.as_deref())
            .unwrap_or_default()
            .to_lowercase();
        self.reference
            .item
            .as_ref()
            .and_then(|item| item.get(&name))
            .cloned()
            .unwrap_or_default()
    }

    /// The cached item already answers a lookup of `value` for `row`
    pub fn is_resolved_for(&self, row: RowId, value: &Value) -> bool {
        self.def.ref_field.is_some()
            && self.reference.item.is_some()
            && self.reference.owner == Some(row)
            && self.ref_value(None).same_as(value)
    }

    /// Display text the cached item gives for this column
    pub fn ref_text(&self) -> Option<String> {
        let item = self.reference.item.as_ref()?;
        if self.is_enum_ref() {
            return item.get("name").map(|v| v.to_string());
        }
        if self.is_table_ref() {
            let name = self.def.ref_field_name.as_deref()?.to_lowercase();
            return item.get(&name).filter(|v| !v.is_null()).map(|v| v.to_string());
        }
        None
    }

    /// Candidate list rendered as key/value pairs
    pub fn ref_list(&self) -> Vec<RefListEntry> {
        let sep = self.def.ref_separator.as_deref().unwrap_or("");
        if self.is_enum_ref() {
            return self
                .reference
                .items
                .iter()
                .map(|item| {
                    let code = item.get("code").map(|v| v.to_string()).unwrap_or_default();
                    let name = item.get("name").map(|v| v.to_string()).unwrap_or_default();
                    RefListEntry {
                        value: format!("{code}{sep}{name}"),
                        key: code,
                    }
                })
                .collect();
        }

        let Some(ref_field) = self.def.ref_field.as_deref().filter(|_| self.is_table_ref()) else {
            return Vec::new();
        };
        let ref_field = ref_field.to_lowercase();
        let ref_field_name = self.def.ref_field_name.as_deref().map(str::to_lowercase);
        self.reference
            .items
            .iter()
            .map(|item| {
                let key = item.get(&ref_field).map(|v| v.to_string()).unwrap_or_default();
                let value = match &ref_field_name {
                    Some(name) => format!(
                        "{key}{sep}{}",
                        item.get(name).map(|v| v.to_string()).unwrap_or_default()
                    ),
                    None => key.clone(),
                };
                RefListEntry { key, value }
            })
            .collect()
    }
}

/// Enumeration entry as a reference item
pub fn enum_ref_item(item: &EnumItem) -> RefItem {
    let mut ref_item = RefItem::new();
    ref_item.insert("code".into(), Value::String(item.code.clone()));
    ref_item.insert("name".into(), Value::String(item.name.clone()));
    ref_item
}

/// Follow property aliases to the table the column ultimately references.
/// Alias cycles resolve to `None`.
pub fn resolve_ref_obj_code(columns: &[Column], index: usize) -> Option<&str> {
    let mut current = columns.get(index)?;
    for _ in 0..columns.len() {
        match current.def.ref_type {
            RefType::Table => return current.def.ref_obj.as_deref(),
            RefType::Prop => {
                let target = current.def.ref_obj.as_deref()?;
                current = columns.iter().find(|c| c.field_name() == target)?;
            }
            _ => return None,
        }
    }
    None
}
