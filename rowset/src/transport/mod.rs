//! Collaborators at the engine boundary: the request/response transport
//! and the enumeration provider, plus in-memory implementations.

use crate::dataset::{ObjectPayload, Response, SaveRequest, SchemaData, SearchRequest};
use crate::event::JsonMap;
use crate::row::RowState;
use crate::schema::EnumItem;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Synchronous request/response collaborator for search and save.
/// Retry and timeouts are its own business.
pub trait Transport {
    fn search(&mut self, request: &SearchRequest) -> Result<Response, TransportError>;
    fn save(&mut self, request: &SaveRequest) -> Result<Response, TransportError>;
}

/// Source of enumeration values for `enum` reference columns
pub trait EnumProvider {
    fn items(&self, enum_id: &str) -> Option<&[EnumItem]>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticEnums {
    enums: BTreeMap<String, Vec<EnumItem>>,
}

impl StaticEnums {
    pub fn new(enums: BTreeMap<String, Vec<EnumItem>>) -> Self {
        StaticEnums { enums }
    }

    pub fn insert(&mut self, enum_id: &str, items: Vec<EnumItem>) {
        self.enums.insert(enum_id.to_string(), items);
    }
}

impl EnumProvider for StaticEnums {
    fn items(&self, enum_id: &str) -> Option<&[EnumItem]> {
        self.enums.get(enum_id).map(Vec::as_slice)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<JsonMap>>,
    output_params: BTreeMap<String, JsonMap>,
    searches: Vec<SearchRequest>,
    saves: Vec<SaveRequest>,
    offline: bool,
}

/// In-memory transport over tables of wire records. Clones share state, so a
/// test can keep a handle after boxing one into a registry.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, obj_id: &str, rows: Vec<JsonMap>) -> Self {
        self.set_table(obj_id, rows);
        self
    }

    pub fn set_table(&self, obj_id: &str, rows: Vec<JsonMap>) {
        self.state.borrow_mut().tables.insert(obj_id.to_string(), rows);
    }

    pub fn table(&self, obj_id: &str) -> Vec<JsonMap> {
        self.state
            .borrow()
            .tables
            .get(obj_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Values returned in `columns` for an object on every response
    pub fn set_output_params(&self, obj_id: &str, params: JsonMap) {
        self.state
            .borrow_mut()
            .output_params
            .insert(obj_id.to_string(), params);
    }

    /// Simulate an outage: every request fails while offline
    pub fn set_offline(&self, offline: bool) {
        self.state.borrow_mut().offline = offline;
    }

    pub fn searches(&self) -> Vec<SearchRequest> {
        self.state.borrow().searches.clone()
    }

    pub fn saves(&self) -> Vec<SaveRequest> {
        self.state.borrow().saves.clone()
    }

    fn query(state: &MemoryState, obj_id: &str, payload: &ObjectPayload) -> SchemaData {
        let params = &payload.query_params;
        let rows: Vec<JsonMap> = state
            .tables
            .get(obj_id)
            .map(|t| t.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|row| params.fix_query.iter().all(|(k, v)| field_matches(row, k, v)))
            .filter(|row| ref_query_matches(row, &params.ref_query))
            .cloned()
            .collect();

        let total = rows.len() as i64;
        let rows = if payload.page_size > 0 {
            let skip = (payload.page_index.max(0) * payload.page_size) as usize;
            rows.into_iter()
                .skip(skip)
                .take(payload.page_size as usize)
                .collect()
        } else {
            rows
        };

        SchemaData {
            rows: Some(rows),
            columns: state.output_params.get(obj_id).cloned(),
            total_rows: Some(total),
        }
    }

    fn apply(state: &mut MemoryState, obj_id: &str, payload: &ObjectPayload) {
        let table = state.tables.entry(obj_id.to_string()).or_default();
        for record in &payload.rows {
            let row_state = record
                .get("$state")
                .and_then(|s| serde_json::from_value::<RowState>(s.clone()).ok());
            match row_state {
                Some(RowState::Added) => table.push(current_values(record)),
                Some(RowState::Modified) => {
                    if let Some(existing) = table.iter_mut().find(|r| matches_origin(r, record)) {
                        *existing = current_values(record);
                    }
                }
                Some(RowState::Deleted) => {
                    if let Some(pos) = table.iter().position(|r| matches_origin(r, record)) {
                        table.remove(pos);
                    }
                }
                _ => {}
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn search(&mut self, request: &SearchRequest) -> Result<Response, TransportError> {
        let mut state = self.state.borrow_mut();
        state.searches.push(request.clone());
        if state.offline {
            return Err(TransportError::Unavailable("memory transport is offline".into()));
        }

        Ok(request
            .search_data
            .iter()
            .map(|(obj_id, payload)| (obj_id.clone(), Self::query(&state, obj_id, payload)))
            .collect())
    }

    fn save(&mut self, request: &SaveRequest) -> Result<Response, TransportError> {
        let mut state = self.state.borrow_mut();
        state.saves.push(request.clone());
        if state.offline {
            return Err(TransportError::Unavailable("memory transport is offline".into()));
        }

        let mut response = Response::new();
        for (obj_id, payload) in &request.save_data {
            Self::apply(&mut state, obj_id, payload);
            response.insert(
                obj_id.clone(),
                SchemaData {
                    rows: None,
                    columns: state.output_params.get(obj_id).cloned(),
                    total_rows: None,
                },
            );
        }
        Ok(response)
    }
}

fn text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Loose equality on the text form, so `1` matches `"1"` and `1.0` matches `1`
fn same(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => text(a) == text(b),
    }
}

fn field<'r>(row: &'r JsonMap, name: &str) -> Option<&'r serde_json::Value> {
    row.get(name).or_else(|| row.get(&name.to_lowercase()))
}

fn field_matches(row: &JsonMap, name: &str, expected: &serde_json::Value) -> bool {
    field(row, name).map_or(expected.is_null(), |v| same(v, expected))
}

fn ref_query_matches(row: &JsonMap, ref_query: &JsonMap) -> bool {
    if let Some(filter) = ref_query.get("userRefWhere").and_then(|w| w.as_object()) {
        if !filter.iter().all(|(k, v)| field_matches(row, k, v)) {
            return false;
        }
    }

    let ignore = ref_query
        .get("ignoreValue")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let value = ref_query.get("value").filter(|v| !v.is_null());
    let ref_field = ref_query.get("refField").and_then(|f| f.as_str());
    match (ignore, value, ref_field) {
        (false, Some(value), Some(ref_field)) => field_matches(row, ref_field, value),
        _ => true,
    }
}

fn current_values(record: &JsonMap) -> JsonMap {
    record
        .iter()
        .filter(|(k, _)| !k.starts_with("old_") && k.as_str() != "$state")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn matches_origin(row: &JsonMap, record: &JsonMap) -> bool {
    let mut keys = record
        .iter()
        .filter_map(|(k, v)| k.strip_prefix("old_").map(|f| (f, v)))
        .filter(|(_, v)| !v.is_null())
        .peekable();
    keys.peek().is_some() && keys.all(|(f, v)| field_matches(row, f, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::QueryParams;
    use serde_json::json;

    fn rows(value: serde_json::Value) -> Vec<JsonMap> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    fn search(transport: &mut MemoryTransport, obj_id: &str, payload: ObjectPayload) -> SchemaData {
        let mut request = SearchRequest::default();
        request.search_data.insert(obj_id.to_string(), payload);
        transport.search(&request).unwrap().remove(obj_id).unwrap()
    }

    #[test]
    fn test_search_filters_and_pages() {
        let mut transport = MemoryTransport::new().with_table(
            "lines",
            rows(json!([
                { "orderId": 1, "amount": 10.5 },
                { "orderId": 1, "amount": 5.25 },
                { "orderId": 2, "amount": 1 }
            ])),
        );

        let mut params = QueryParams::default();
        params.fix_query.insert("orderId".into(), json!("1"));
        let data = search(
            &mut transport,
            "lines",
            ObjectPayload {
                page_size: 1,
                page_index: 1,
                query_params: params,
                ..Default::default()
            },
        );
        assert_eq!(data.total_rows, Some(2));
        let page = data.rows.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["amount"], json!(5.25));
        assert_eq!(transport.searches().len(), 1);
    }

    #[test]
    fn test_reference_query() {
        let mut transport = MemoryTransport::new().with_table(
            "customers",
            rows(json!([{ "code": "C01", "name": "Acme" }, { "code": "C02", "name": "Globex" }])),
        );
        let mut params = QueryParams::default();
        params.ref_query = json!({ "refField": "code", "value": "C02", "ignoreValue": false })
            .as_object()
            .unwrap()
            .clone();
        let data = search(
            &mut transport,
            "customers",
            ObjectPayload {
                query_params: params,
                ..Default::default()
            },
        );
        assert_eq!(data.rows.unwrap()[0]["name"], json!("Globex"));
    }

    #[test]
    fn test_save_applies_delta() {
        let mut transport = MemoryTransport::new()
            .with_table("t", rows(json!([{ "id": 1, "v": "a" }, { "id": 2, "v": "b" }])));
        let mut request = SaveRequest::default();
        request.save_data.insert(
            "t".into(),
            ObjectPayload {
                rows: rows(json!([
                    { "id": 1, "old_id": 1, "v": "A", "old_v": "a", "$state": "MODIFIED" },
                    { "id": 2, "old_id": 2, "v": "b", "old_v": "b", "$state": "DELETED" },
                    { "id": 3, "old_id": null, "v": "c", "old_v": null, "$state": "ADDED" }
                ])),
                ..Default::default()
            },
        );
        transport.save(&request).unwrap();

        let table = transport.table("t");
        assert_eq!(table.len(), 2);
        assert_eq!(table[0]["v"], json!("A"));
        assert_eq!(table[1]["id"], json!(3));
        assert!(table[1].get("$state").is_none());
    }

    #[test]
    fn test_offline() {
        let mut transport = MemoryTransport::new();
        let handle = transport.clone();
        handle.set_offline(true);
        assert!(matches!(
            transport.save(&SaveRequest::default()),
            Err(TransportError::Unavailable(_))
        ));
        assert_eq!(handle.saves().len(), 1);
    }
}
