//! Wire shapes exchanged with the transport collaborator.

use crate::event::JsonMap;
use crate::schema::ObjType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultQuery {
    pub func_obj_code: String,
    pub menu_id: Option<String>,
}

/// Query parameters sent with every object payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    #[serde(default)]
    pub fix_query: JsonMap,
    #[serde(default)]
    pub search_query: JsonMap,
    #[serde(default)]
    pub ref_query: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_query: Option<DefaultQuery>,
    #[serde(default)]
    pub project_query: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    /// Master current row, for detail objects
    #[serde(rename = "M", default, skip_serializing_if = "Option::is_none")]
    pub master: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_query: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caution_query: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_query: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ext_sql_query: Option<String>,
}

/// Reference lookup parameters, carried in `refQuery`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefQuery {
    pub field_name: String,
    pub ui_obj_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_field: Option<String>,
    #[serde(default)]
    pub user_ref_where: JsonMap,
    #[serde(default)]
    pub value: serde_json::Value,
    /// Row being edited, empty outside edit mode
    #[serde(rename = "D", default)]
    pub row: JsonMap,
    #[serde(default)]
    pub ignore_value: bool,
    #[serde(rename = "M", default, skip_serializing_if = "Option::is_none")]
    pub master: Option<JsonMap>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRelationSchema {
    pub master_key: String,
    pub detail_key: String,
    pub ui_obj_id: String,
}

/// Schema plus delta of one object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPayload {
    pub menu_id: Option<String>,
    pub obj_type: ObjType,
    pub page_size: i64,
    pub page_index: i64,
    pub total_rows: i64,
    pub query_params: QueryParams,
    #[serde(default)]
    pub column_params: JsonMap,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default)]
    pub detail_relation: Vec<DetailRelationSchema>,
    #[serde(default)]
    pub rows: Vec<JsonMap>,
}

/// Payloads keyed by object id
pub type SchemaPayload = BTreeMap<String, ObjectPayload>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub before_proc: Option<String>,
    pub after_proc: Option<String>,
    pub search_data: SchemaPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    pub before_proc: Option<String>,
    pub after_proc: Option<String>,
    pub save_data: SchemaPayload,
    pub save_ext_class: Option<String>,
}

/// Result of one object in a transport response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaData {
    #[serde(default)]
    pub rows: Option<Vec<JsonMap>>,
    /// Stored-procedure output parameter values
    #[serde(default)]
    pub columns: Option<JsonMap>,
    #[serde(default)]
    pub total_rows: Option<i64>,
}

pub type Response = BTreeMap<String, SchemaData>;

/// Options for assembling an object payload
#[derive(Debug, Clone, Default)]
pub(crate) struct PayloadArgs {
    pub deep: bool,
    pub no_data: bool,
    pub only_current: bool,
    pub delete_current: bool,
    pub update_row: Option<crate::row::RowId>,
    /// Master row data whose key values filter this detail
    pub master_row: Option<JsonMap>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_is_camel_case() {
        let mut params = QueryParams::default();
        params.fix_query.insert("orderId".into(), serde_json::json!(1));
        params.master = Some(JsonMap::new());
        let payload = ObjectPayload {
            menu_id: Some("m1".into()),
            page_size: -1,
            query_params: params,
            detail_relation: vec![DetailRelationSchema {
                master_key: "orderId".into(),
                detail_key: "orderId".into(),
                ui_obj_id: "order_lines".into(),
            }],
            ..Default::default()
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["menuId"], serde_json::json!("m1"));
        assert_eq!(json["pageSize"], serde_json::json!(-1));
        assert_eq!(json["objType"], serde_json::json!("table"));
        assert_eq!(json["queryParams"]["fixQuery"]["orderId"], serde_json::json!(1));
        assert_eq!(json["queryParams"]["M"], serde_json::json!({}));
        assert!(json["queryParams"].get("order").is_none());
        assert_eq!(json["detailRelation"][0]["uiObjId"], serde_json::json!("order_lines"));
    }

    #[test]
    fn test_response_parses() {
        let response: Response = serde_json::from_str(
            r#"{ "orders": { "rows": [ { "orderId": 1 } ], "totalRows": 40 } }"#,
        )
        .unwrap();
        let data = &response["orders"];
        assert_eq!(data.total_rows, Some(40));
        assert_eq!(data.rows.as_ref().map(Vec::len), Some(1));
        assert!(data.columns.is_none());
    }
}
