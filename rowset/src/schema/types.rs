use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level dictionary document: every object, relation and enumeration
/// the dictionary service hands to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dictionary {
    #[serde(default)]
    pub objects: Vec<ObjectDefinition>,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
    #[serde(default)]
    pub enums: BTreeMap<String, Vec<EnumItem>>,
}

impl Dictionary {
    pub fn object(&self, obj_id: &str) -> Option<&ObjectDefinition> {
        self.objects.iter().find(|o| o.obj_id == obj_id)
    }
}

/// Schema of one dataset ("UI object")
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDefinition {
    pub obj_id: String,
    #[serde(default)]
    pub obj_name: String,
    #[serde(default)]
    pub obj_desc: Option<String>,
    #[serde(default)]
    pub menu_id: Option<String>,
    #[serde(default)]
    pub obj_type: ObjType,
    #[serde(default = "default_true")]
    pub is_deletable: bool,
    #[serde(default = "default_true")]
    pub is_editable: bool,
    #[serde(default = "default_true")]
    pub is_insertable: bool,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default = "default_true")]
    pub is_multi_page: bool,
    #[serde(default = "default_true")]
    pub is_save_refresh: bool,
    /// Comma-separated composite key checked for duplicates on validate
    #[serde(default)]
    pub multi_fields: Option<String>,
    #[serde(default)]
    pub multi_msg: Option<String>,
    #[serde(default)]
    pub default_order: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
}

impl ObjectDefinition {
    pub fn new(obj_id: &str, columns: Vec<ColumnDefinition>) -> Self {
        ObjectDefinition {
            obj_id: obj_id.to_string(),
            obj_name: obj_id.to_string(),
            obj_desc: None,
            menu_id: None,
            obj_type: ObjType::Table,
            is_deletable: true,
            is_editable: true,
            is_insertable: true,
            is_master: false,
            is_multi_page: true,
            is_save_refresh: true,
            multi_fields: None,
            multi_msg: None,
            default_order: None,
            columns,
        }
    }

    pub fn column(&self, field_name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.field_name == field_name)
    }
}

/// Schema of one field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub field_name: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub data_width: u32,
    #[serde(default)]
    pub data_dec: u32,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default = "default_true")]
    pub is_editable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    /// Calculated columns skip type and width checks
    #[serde(default)]
    pub is_calc: bool,
    #[serde(default)]
    pub is_strict_ref: bool,
    /// Counts toward row emptiness
    #[serde(default)]
    pub is_empty_row_field: bool,
    #[serde(default)]
    pub ref_type: RefType,
    #[serde(default)]
    pub ref_obj: Option<String>,
    #[serde(default)]
    pub ref_field: Option<String>,
    #[serde(default)]
    pub ref_field_name: Option<String>,
    #[serde(default)]
    pub ref_separator: Option<String>,
    /// Comma-separated enumeration codes allowed while editing
    #[serde(default)]
    pub ref_edit_where: Option<String>,
    /// Wildcard value accepted by a table reference without lookup
    #[serde(default)]
    pub match_char: Option<String>,
    /// Validation pattern
    #[serde(default)]
    pub set_rule: Option<String>,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub disp_name: Option<String>,
    #[serde(default)]
    pub disp_format: Option<String>,
    #[serde(default)]
    pub disp_width: Option<u32>,
    #[serde(default)]
    pub disp_scale: Option<u32>,
    #[serde(default)]
    pub edit_style: EditStyle,
    #[serde(default)]
    pub proc_para_type: ProcParaType,
}

impl ColumnDefinition {
    pub fn new(field_name: &str, data_type: DataType) -> Self {
        ColumnDefinition {
            field_name: field_name.to_string(),
            data_type,
            data_width: 0,
            data_dec: 0,
            is_required: false,
            is_editable: true,
            is_primary_key: false,
            is_calc: false,
            is_strict_ref: false,
            is_empty_row_field: false,
            ref_type: RefType::None,
            ref_obj: None,
            ref_field: None,
            ref_field_name: None,
            ref_separator: None,
            ref_edit_where: None,
            match_char: None,
            set_rule: None,
            default_value: None,
            disp_name: None,
            disp_format: None,
            disp_width: None,
            disp_scale: None,
            edit_style: EditStyle::Text,
            proc_para_type: ProcParaType::None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.disp_name.as_deref().unwrap_or(&self.field_name)
    }
}

/// Master-detail link between two objects
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDefinition {
    pub master: String,
    pub detail: String,
    /// Comma-separated master key columns
    pub master_key: String,
    /// Comma-separated detail key columns, parallel to `master_key`
    pub detail_key: String,
    #[serde(default)]
    pub detail_required: bool,
}

/// One enumeration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumItem {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Number,
    #[default]
    String,
    Datetime,
    Boolean,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    #[default]
    None,
    Enum,
    Table,
    /// Property alias: `refObj` names another column of the same object
    Prop,
    /// Sum of a detail column, `refObj` is the detail object and `refField` its column
    Total,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjType {
    #[default]
    Table,
    View,
    StoredProc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcParaType {
    #[default]
    None,
    In,
    Out,
    InOut,
    Return,
    Msg,
    ErrCode,
    LogErrMsg,
    FunctionResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStyle {
    #[default]
    Text,
    Reference,
    Combobox,
    Checkbox,
    Datetime,
    Date,
    Time,
    Button,
    Link,
    BigText,
    Password,
    Number,
    Autocomplete,
}

fn default_true() -> bool {
    true
}
