mod edit;
mod handle;
mod payload;

pub use handle::DatasetMut;
pub use payload::{
    DefaultQuery, DetailRelationSchema, ObjectPayload, QueryParams, RefQuery, Response,
    SaveRequest, SchemaData, SchemaPayload, SearchRequest,
};

pub(crate) use edit::{Editor, MasterContext, Services};
pub(crate) use payload::PayloadArgs;

use crate::column::Column;
use crate::error::{Result, RowsetError};
use crate::event::{CollectionAction, Event, EventBus, EventKind, Handler, JsonMap, SubscriptionId};
use crate::relation::Relation;
use crate::row::{Row, RowId, RowState, RowStore};
use crate::schema::{DataType, ObjType, ObjectDefinition};
use crate::validation::{ColumnError, ColumnErrorKind};
use crate::value::{Decimal, Value};
use crate::messages;
use std::collections::{BTreeMap, HashMap};

/// Filters a dataset sends with its searches
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub fix_query: JsonMap,
    pub search_query: JsonMap,
    pub ref_query: JsonMap,
    pub link_query: Option<JsonMap>,
    /// Sent with the next request only
    pub caution_query: Option<JsonMap>,
    pub tree_query: Option<serde_json::Value>,
    pub user_ext_sql_query: Option<String>,
}

/// Stored-procedure objects run by the server around searches and saves
#[derive(Debug, Clone, Default)]
pub struct Procedures {
    pub before_search: Option<String>,
    pub after_search: Option<String>,
    pub before_save: Option<String>,
    pub after_save: Option<String>,
    pub before_delete: Option<String>,
}

/// Checkpoint of the live, deleted and origin row sequences
#[derive(Debug, Clone)]
pub struct DataSnapshot {
    store: RowStore,
}

/// An ordered collection of rows sharing one column schema.
///
/// Everything here touches this dataset only. Operations that reach other
/// datasets (relations, aggregation, requests) live on [`DatasetMut`].
#[derive(Debug)]
pub struct Dataset {
    def: ObjectDefinition,
    columns: Vec<Column>,
    names: HashMap<String, usize>,
    store: RowStore,
    current: Option<RowId>,
    max_id: u64,
    page_size: i64,
    page_index: i64,
    total_rows: i64,
    need_update_total_rows: bool,
    editable: bool,
    require_detail: bool,
    opened: bool,
    error: Option<String>,
    parent: Option<Relation>,
    children: Vec<String>,
    id_sequence: HashMap<String, i64>,
    query: QueryState,
    procedures: Procedures,
    only_save_current: bool,
    save_ext_class: Option<String>,
    events: EventBus,
}

impl Dataset {
    pub fn new(def: ObjectDefinition) -> Result<Self> {
        let mut names = HashMap::new();
        let mut columns = Vec::with_capacity(def.columns.len());
        for (index, column_def) in def.columns.iter().enumerate() {
            if names.insert(column_def.field_name.clone(), index).is_some() {
                return Err(RowsetError::Schema(format!(
                    "Field '{}' is defined twice on '{}'",
                    column_def.field_name, def.obj_id
                )));
            }
            columns.push(Column::new(column_def.clone(), index)?);
        }

        Ok(Dataset {
            def,
            columns,
            names,
            store: RowStore::default(),
            current: None,
            max_id: 0,
            page_size: -1,
            page_index: 0,
            total_rows: -1,
            need_update_total_rows: true,
            editable: false,
            require_detail: false,
            opened: true,
            error: None,
            parent: None,
            children: Vec::new(),
            id_sequence: HashMap::new(),
            query: QueryState::default(),
            procedures: Procedures::default(),
            only_save_current: false,
            save_ext_class: None,
            events: EventBus::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.def.obj_id
    }

    pub fn definition(&self) -> &ObjectDefinition {
        &self.def
    }

    pub fn is_stored_proc(&self) -> bool {
        self.def.obj_type == ObjType::StoredProc
    }

    // ── Columns ────────────────────────────────────────────────────

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names.get(name).map(|&i| &self.columns[i])
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.names.get(name).map(|&i| &mut self.columns[i])
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| RowsetError::UnknownColumn {
                dataset: self.def.obj_id.clone(),
                column: name.to_string(),
            })
    }

    // ── Rows ───────────────────────────────────────────────────────

    /// Live rows in display order
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.store.live()
    }

    pub fn row_ids(&self) -> &[RowId] {
        self.store.live_ids()
    }

    pub fn deleted_rows(&self) -> impl Iterator<Item = &Row> {
        self.store.deleted()
    }

    pub fn store(&self) -> &RowStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Any row held by this dataset, live, deleted or origin
    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.store.get(id)
    }

    pub fn require_row(&self, id: RowId) -> Result<&Row> {
        self.store.get(id).ok_or_else(|| RowsetError::RowNotFound {
            dataset: self.def.obj_id.clone(),
            row: id,
        })
    }

    pub(crate) fn row_mut(&mut self, id: RowId) -> Result<&mut Row> {
        let dataset = &self.def.obj_id;
        self.store
            .get_mut(id)
            .ok_or_else(|| RowsetError::RowNotFound {
                dataset: dataset.clone(),
                row: id,
            })
    }

    pub fn selected_rows(&self) -> Vec<RowId> {
        self.rows().filter(|r| r.is_selected()).map(Row::id).collect()
    }

    pub fn set_selected(&mut self, row: RowId, selected: bool) -> Result<()> {
        self.row_mut(row)?.set_selected(selected);
        Ok(())
    }

    pub fn value(&self, row: RowId, column: &str) -> Result<&Value> {
        let index = self.column_index(column)?;
        Ok(self.require_row(row)?.value(index))
    }

    /// Display text: value plus reference text
    pub fn column_text(&self, row: RowId, column: &str) -> Result<String> {
        let index = self.column_index(column)?;
        let row = self.require_row(row)?;
        Ok(self.columns[index].text(row.value(index), row.ref_text(index)))
    }

    pub fn column_error(&self, row: RowId, column: &str) -> Result<Option<&str>> {
        self.column_index(column)?;
        Ok(self.require_row(row)?.error(column))
    }

    /// Assign without validation. Still clears the column error, marks the
    /// row modified and fires value-changed.
    pub fn set_column_value(&mut self, row: RowId, column: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.column_index(column)?;
        self.assign(row, index, value.into())?;
        self.notify(Event::ValueChanged {
            row,
            column: column.to_string(),
        });
        Ok(())
    }

    pub fn set_column_ref_text(&mut self, row: RowId, column: &str, text: Option<String>) -> Result<()> {
        let index = self.column_index(column)?;
        self.row_mut(row)?.set_ref_text(index, text);
        Ok(())
    }

    pub(crate) fn assign(&mut self, row: RowId, index: usize, value: Value) -> Result<()> {
        let dataset = &self.def.obj_id;
        let target = self
            .store
            .get_mut(row)
            .ok_or_else(|| RowsetError::RowNotFound {
                dataset: dataset.clone(),
                row,
            })?;
        target.assign(&self.columns[index], value);
        Ok(())
    }

    /// A detached row with every value null, not yet part of the dataset
    pub fn blank_row(&self) -> Row {
        Row::new(self.columns.len())
    }

    /// Give the row the next identity and take ownership of it without
    /// making it live.
    pub(crate) fn register_row(&mut self, mut row: Row) -> RowId {
        self.max_id += 1;
        let id = RowId(self.max_id);
        row.set_id(id);
        self.store.insert(row);
        id
    }

    /// Append a registered row as Added and make it current
    pub(crate) fn publish_added(&mut self, id: RowId) -> Result<()> {
        self.row_mut(id)?.set_state(RowState::Added);
        self.store.push_live(id);
        if self.opened {
            self.notify(Event::CollectionChanged {
                action: CollectionAction::Add,
                row: Some(id),
            });
            self.set_current_row(Some(id));
            self.notify(Event::RowAdded { row: id });
        }
        Ok(())
    }

    /// Structural removal from the live sequence. Returns the former position.
    pub(crate) fn remove_live(&mut self, id: RowId) -> Option<usize> {
        let position = self.store.remove_live(id)?;
        if self.opened {
            self.notify(Event::RowRemoved { row: id });
            self.notify(Event::CollectionChanged {
                action: CollectionAction::Remove,
                row: Some(id),
            });
            self.move_to(position.saturating_sub(1));
        } else if self.current == Some(id) {
            self.current = None;
        }
        Some(position)
    }

    /// Empty live rows, origin and deleted rows. Not undoable.
    pub fn clear(&mut self) {
        self.store = RowStore::default();
        self.id_sequence.clear();
        self.set_total_rows(0);
        self.set_current_row(None);
        self.notify(Event::Cleared);
        self.notify(Event::CollectionChanged {
            action: CollectionAction::Reset,
            row: None,
        });
    }

    /// Accept every live row; the live sequence becomes the origin and
    /// parked detail rows are dropped.
    pub fn accept_changes(&mut self) {
        let live = self.store.live_ids().to_vec();
        for id in live {
            if let Some(row) = self.store.get_mut(id) {
                row.details_mut().clear();
            }
        }
        self.store.accept();
    }

    /// Rebuild the live rows from origin. The current row survives when it
    /// is still present afterwards.
    pub fn reject_changes(&mut self) {
        let keep = self
            .current
            .and_then(|id| self.store.get(id))
            .filter(|r| matches!(r.state(), RowState::Modified | RowState::Unchanged))
            .map(Row::id);

        self.store.reject();
        self.current = keep.filter(|id| self.store.contains_live(*id));
        self.notify(Event::CollectionChanged {
            action: CollectionAction::Reset,
            row: None,
        });
    }

    /// Deleted rows plus live rows with pending changes, this dataset only.
    /// Hierarchy-aware collection is [`crate::Registry::changes`].
    pub fn local_changes(&self) -> Vec<&Row> {
        self.store
            .deleted()
            .chain(self.store.live().filter(|r| r.state().is_changed()))
            .collect()
    }

    pub fn snap_data(&self) -> DataSnapshot {
        DataSnapshot {
            store: self.store.clone(),
        }
    }

    pub fn reset_data(&mut self, snapshot: DataSnapshot) {
        self.opened = false;
        self.id_sequence.clear();
        self.store = snapshot.store;
        self.current = self.store.live_ids().first().copied();
        self.notify(Event::CollectionChanged {
            action: CollectionAction::Reset,
            row: None,
        });
        self.opened = true;
    }

    /// Replace nothing, append every record as an accepted row. Per-row
    /// notifications are suppressed; one reset fires at the end.
    pub fn load_rows(&mut self, records: &[JsonMap]) {
        self.notify(Event::BeforeLoad {
            rows: records.len(),
        });

        self.opened = false;
        for record in records {
            let mut row = self.blank_row();
            row.load_data(&self.columns, record);
            let id = self.register_row(row);
            if let Some(row) = self.store.get_mut(id) {
                row.set_state(RowState::Added);
            }
            self.store.push_live(id);
        }
        self.accept_changes();
        self.opened = true;

        self.notify(Event::CollectionChanged {
            action: CollectionAction::Reset,
            row: None,
        });
        self.notify(Event::AfterLoad { ok: true });
        let first = self.store.live_ids().first().copied();
        self.set_current_row(first);
    }

    /// Apply one object of a transport response. Save responses carry
    /// parameters and counts only, so rows are applied on request.
    pub fn apply_schema_data(&mut self, data: &SchemaData, with_rows: bool) {
        if let Some(total) = data.total_rows.filter(|t| *t != 0) {
            self.set_total_rows(total);
        }
        if let Some(columns) = &data.columns {
            for (name, value) in columns {
                if let Some(&index) = self.names.get(name) {
                    self.columns[index].set_para_value(Value::from_json(value));
                }
            }
        }
        if with_rows {
            if let Some(rows) = &data.rows {
                self.load_rows(rows);
            }
        }
    }

    /// True when no live row holds data in its emptiness columns
    pub fn is_empty(&self) -> bool {
        self.rows().all(|r| r.is_empty(&self.columns))
    }

    // ── Current row ────────────────────────────────────────────────

    pub fn current_row(&self) -> Option<RowId> {
        self.current
    }

    /// Rows that are not live cannot become current. Notification only
    /// happens while the dataset is opened.
    pub fn set_current_row(&mut self, row: Option<RowId>) {
        let row = row.filter(|id| self.store.contains_live(*id));
        let old = self.current;
        self.current = row;
        if self.opened && old != row {
            self.notify(Event::CurrentChanged { old, new: row });
        }
    }

    pub fn move_to(&mut self, position: usize) {
        let row = self.store.live_ids().get(position).copied();
        self.set_current_row(row);
    }

    pub fn move_next(&mut self) {
        let position = match self.current.and_then(|id| self.store.position(id)) {
            Some(p) => (p + 1).min(self.store.len()),
            None => 0,
        };
        self.move_to(position);
    }

    pub fn move_prev(&mut self) {
        let position = self
            .current
            .and_then(|id| self.store.position(id))
            .map_or(0, |p| p.saturating_sub(1));
        self.move_to(position);
    }

    pub fn move_first(&mut self) {
        self.move_to(0);
    }

    pub fn move_last(&mut self) {
        self.move_to(self.store.len().saturating_sub(1));
    }

    // ── Properties ─────────────────────────────────────────────────

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn set_page_size(&mut self, value: i64) {
        self.page_size = value;
        self.property_changed("PageSize");
    }

    pub fn page_index(&self) -> i64 {
        self.page_index
    }

    pub fn set_page_index(&mut self, value: i64) {
        self.page_index = value;
        self.property_changed("PageIndex");
    }

    /// Server row count, never less than the live row count when unknown
    pub fn total_rows(&self) -> i64 {
        if self.total_rows <= 0 && !self.store.is_empty() {
            return self.store.len() as i64;
        }
        self.total_rows.max(0)
    }

    pub fn set_total_rows(&mut self, value: i64) {
        self.total_rows = value;
        self.property_changed("TotalRows");
    }

    pub fn need_update_total_rows(&self) -> bool {
        self.need_update_total_rows
    }

    pub fn set_need_update_total_rows(&mut self, value: bool) {
        self.need_update_total_rows = value;
        self.property_changed("NeedUpdateTotalRows");
    }

    pub fn editable(&self) -> bool {
        self.editable
    }

    pub fn set_editable(&mut self, value: bool) {
        self.editable = value;
        self.property_changed("Editable");
    }

    pub fn require_detail(&self) -> bool {
        self.require_detail
    }

    pub fn set_require_detail(&mut self, value: bool) {
        self.require_detail = value;
        self.property_changed("RequireDetail");
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut QueryState {
        &mut self.query
    }

    pub fn procedures_mut(&mut self) -> &mut Procedures {
        &mut self.procedures
    }

    pub fn set_only_save_current(&mut self, value: bool) {
        self.only_save_current = value;
    }

    pub fn set_save_ext_class(&mut self, class_name: Option<String>) {
        self.save_ext_class = class_name;
    }

    // ── Errors ─────────────────────────────────────────────────────

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::debug!("{}: {message}", self.def.obj_id);
        self.error = Some(message.clone());
        self.notify(Event::Error { message });
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    // ── Relations ──────────────────────────────────────────────────

    /// The relation in which this dataset is the detail
    pub fn parent_relation(&self) -> Option<&Relation> {
        self.parent.as_ref()
    }

    pub fn master_id(&self) -> Option<&str> {
        self.parent.as_ref().map(Relation::master)
    }

    /// Detail dataset ids, in relation order
    pub fn detail_ids(&self) -> &[String] {
        &self.children
    }

    pub fn first_detail(&self) -> Option<&str> {
        self.children.first().map(String::as_str)
    }

    pub(crate) fn set_parent(&mut self, relation: Option<Relation>) {
        self.parent = relation;
    }

    pub(crate) fn add_child(&mut self, detail: &str) {
        self.children.push(detail.to_string());
    }

    pub(crate) fn remove_child(&mut self, detail: &str) {
        self.children.retain(|c| c != detail);
    }

    // ── Events ─────────────────────────────────────────────────────

    pub fn subscribe(&mut self, kind: EventKind, handler: Handler) -> SubscriptionId {
        self.events.subscribe(kind, handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        self.events.has_subscribers(kind)
    }

    pub(crate) fn emit(&mut self, event: &mut Event) {
        self.events.emit(&self.def.obj_id, event);
    }

    pub(crate) fn notify(&mut self, mut event: Event) {
        self.emit(&mut event);
    }

    fn property_changed(&mut self, property: &str) {
        self.notify(Event::PropertyChanged {
            property: property.to_string(),
        });
    }

    // ── Field state ────────────────────────────────────────────────

    /// Read-only state of one field: the column flag, detail key columns,
    /// persisted master primary keys, then the customisation hook.
    pub fn field_read_only(&mut self, row: RowId, column: &str) -> Result<bool> {
        let index = self.column_index(column)?;
        let state = self.require_row(row)?.state();
        let col = &self.columns[index];

        let mut read_only = col.read_only();
        if !read_only {
            read_only = self
                .parent
                .as_ref()
                .is_some_and(|r| r.is_detail_key(column));
        }
        if !read_only && self.def.is_master && col.definition().is_primary_key {
            read_only = state != RowState::Added;
        }

        let mut event = Event::FieldReadOnly {
            row,
            column: column.to_string(),
            read_only,
        };
        self.emit(&mut event);
        Ok(match event {
            Event::FieldReadOnly { read_only, .. } => read_only,
            _ => read_only,
        })
    }

    // ── Sequences and aggregates ───────────────────────────────────

    /// Next numeric seed for a number column, memoized per field and reset
    /// once the dataset has no rows. `None` for non-numeric columns.
    pub fn next_id(&mut self, column: &str) -> Result<Option<i64>> {
        let index = self.column_index(column)?;
        if self.columns[index].data_type() != DataType::Number {
            return Ok(None);
        }

        if let Some(seed) = self.id_sequence.get_mut(column) {
            if self.store.is_empty() {
                *seed = 0;
            }
            *seed += 1;
            return Ok(Some(*seed));
        }

        let max = self
            .rows()
            .filter_map(|r| r.value(index).as_decimal())
            .filter_map(|d| d.trunc_i64())
            .max()
            .unwrap_or(0)
            .max(0);
        self.id_sequence.insert(column.to_string(), max.saturating_add(1));
        Ok(Some(max.saturating_add(1)))
    }

    pub fn reset_next_id(&mut self, column: Option<&str>) {
        match column {
            Some(name) => {
                self.id_sequence.remove(name);
            }
            None => self.id_sequence.clear(),
        }
    }

    /// Numeric values over the inclusive index range, blanks and text as zero.
    /// `None` marks a non-numeric column.
    fn range_values(&self, column: &str, start: usize, end: usize) -> Result<Option<(Vec<Decimal>, u32)>> {
        let index = self.column_index(column)?;
        let col = &self.columns[index];
        if col.data_type() != DataType::Number {
            return Ok(None);
        }
        let scale = col.definition().disp_scale.unwrap_or(col.definition().data_dec);
        let values = self
            .store
            .live_ids()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i >= start && *i <= end)
            .filter_map(|(_, id)| self.store.get(*id))
            .map(|r| r.value(index).as_decimal().unwrap_or(Decimal::ZERO))
            .collect();
        Ok(Some((values, scale)))
    }

    pub fn sum_column(&self, column: &str, start: usize, end: usize) -> Result<Option<Decimal>> {
        let Some((values, scale)) = self.range_values(column, start, end)? else {
            return Ok(None);
        };
        let sum = self.checked_total(column, values)?;
        Ok(Some(sum.round_dp(scale)))
    }

    /// Sum over the range divided by the number of rows in it, blanks
    /// counting as zero
    pub fn average_column(&self, column: &str, start: usize, end: usize) -> Result<Option<Decimal>> {
        let Some((values, scale)) = self.range_values(column, start, end)? else {
            return Ok(None);
        };
        if values.is_empty() {
            return Ok(Some(Decimal::ZERO.round_dp(scale)));
        }
        let count = Decimal::from_i64(values.len() as i64);
        let sum = self.checked_total(column, values)?;
        Ok(Some(sum.checked_div(count, scale).unwrap_or(Decimal::ZERO)))
    }

    fn checked_total(&self, column: &str, values: Vec<Decimal>) -> Result<Decimal> {
        Decimal::checked_sum(values)
            .ok_or_else(|| RowsetError::Overflow(format!("sum of {}.{column}", self.id())))
    }

    pub fn max_column(&self, column: &str, start: usize, end: usize) -> Result<Option<Decimal>> {
        Ok(self
            .range_values(column, start, end)?
            .map(|(values, _)| values.into_iter().max().unwrap_or(Decimal::ZERO)))
    }

    pub fn min_column(&self, column: &str, start: usize, end: usize) -> Result<Option<Decimal>> {
        Ok(self
            .range_values(column, start, end)?
            .map(|(values, _)| values.into_iter().min().unwrap_or(Decimal::ZERO)))
    }

    // ── Payload helpers ────────────────────────────────────────────

    /// IN/INOUT parameter values of a stored-procedure object
    pub fn column_params(&self) -> JsonMap {
        if !self.is_stored_proc() {
            return JsonMap::new();
        }
        self.columns
            .iter()
            .filter(|c| c.is_input_param())
            .map(|c| (c.field_name().to_string(), c.para_value().to_json()))
            .collect()
    }

    /// Let subscribers bind stored-procedure parameters before a request
    pub(crate) fn bind_proc_params(&mut self) {
        let params: BTreeMap<String, Value> = self
            .columns
            .iter()
            .filter(|c| c.is_input_param())
            .map(|c| (c.field_name().to_string(), c.para_value().clone()))
            .collect();
        let mut event = Event::StoredProcParams { params };
        self.emit(&mut event);
        if let Event::StoredProcParams { params } = event {
            for (name, value) in params {
                if let Some(&index) = self.names.get(&name) {
                    self.columns[index].set_para_value(value);
                }
            }
        }
    }

    /// Duplicate check over the comma-separated `multiFields` key
    pub(crate) fn check_multi_field(&mut self, row: RowId) -> Result<std::result::Result<(), ColumnError>> {
        let Some(fields) = self.def.multi_fields.clone().filter(|f| !f.trim().is_empty()) else {
            return Ok(Ok(()));
        };

        let mut indexes = Vec::new();
        for field in fields.split(',').map(str::trim) {
            match self.names.get(field) {
                Some(&i) => indexes.push(i),
                None => {
                    return Ok(Err(ColumnError::new(
                        ColumnErrorKind::DuplicateKey,
                        messages::format(messages::MULTI_FIELD_MISSING, &[field]),
                    )))
                }
            }
        }

        let tag = |r: &Row| -> Vec<Value> { indexes.iter().map(|&i| r.value(i).clone()).collect() };
        let current = tag(self.require_row(row)?);
        let duplicate = self
            .store
            .live()
            .enumerate()
            .find(|(_, other)| other.id() != row && tag(other) == current)
            .map(|(position, _)| position + 1);

        let Some(line) = duplicate else {
            return Ok(Ok(()));
        };

        let mut event = Event::MultiMessage {
            row,
            message: self
                .def
                .multi_msg
                .clone()
                .unwrap_or_else(|| messages::DUPLICATE_ROW_DEFAULT.to_string()),
        };
        self.emit(&mut event);
        let message = match event {
            Event::MultiMessage { message, .. } => message,
            _ => String::new(),
        };
        Ok(Err(ColumnError::new(
            ColumnErrorKind::DuplicateKey,
            messages::format(messages::DUPLICATE_ROW, &[&line.to_string(), &message]),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_dictionary_str, ColumnDefinition};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn dataset() -> Dataset {
        let dictionary = parse_dictionary_str(
            r#"
objects:
  - objId: items
    objName: Items
    multiFields: code
    multiMsg: code already used
    columns:
      - { fieldName: code, dataType: string, dataWidth: 10, isEmptyRowField: true }
      - { fieldName: qty, dataType: number, dataWidth: 8, dataDec: 2, dispScale: 2 }
      - { fieldName: note, dataType: string }
"#,
        )
        .unwrap();
        Dataset::new(dictionary.objects[0].clone()).unwrap()
    }

    fn add(ds: &mut Dataset, code: &str, qty: &str) -> RowId {
        let id = ds.register_row(ds.blank_row());
        ds.publish_added(id).unwrap();
        ds.set_column_value(id, "code", code).unwrap();
        ds.set_column_value(id, "qty", Value::Number(Decimal::parse(qty).unwrap()))
            .unwrap();
        id
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let def = ObjectDefinition::new(
            "x",
            vec![
                ColumnDefinition::new("a", DataType::String),
                ColumnDefinition::new("a", DataType::String),
            ],
        );
        assert!(matches!(Dataset::new(def), Err(RowsetError::Schema(_))));
    }

    #[test]
    fn test_unknown_column() {
        let ds = dataset();
        let err = ds.column_index("nope").unwrap_err();
        assert!(matches!(err, RowsetError::UnknownColumn { .. }));
    }

    #[test]
    fn test_add_makes_current_and_notifies() {
        let mut ds = dataset();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::RowAdded, EventKind::CurrentChanged, EventKind::CollectionChanged] {
            let seen = seen.clone();
            ds.subscribe(kind, Box::new(move |_, e| seen.borrow_mut().push(e.kind())));
        }

        let id = add(&mut ds, "A", "1");
        assert_eq!(ds.current_row(), Some(id));
        assert_eq!(ds.require_row(id).unwrap().state(), RowState::Added);
        assert_eq!(
            *seen.borrow(),
            vec![EventKind::CollectionChanged, EventKind::CurrentChanged, EventKind::RowAdded]
        );
    }

    #[test]
    fn test_load_rows_is_quiet_until_reset() {
        let mut ds = dataset();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::RowAdded, EventKind::CollectionChanged] {
            let seen = seen.clone();
            ds.subscribe(kind, Box::new(move |_, e| seen.borrow_mut().push(format!("{e:?}"))));
        }

        let records: Vec<JsonMap> = serde_json::from_str(r#"[{"code":"A"},{"code":"B"}]"#).unwrap();
        ds.load_rows(&records);
        assert_eq!(ds.len(), 2);
        assert!(ds.rows().all(|r| r.state() == RowState::Unchanged));
        assert_eq!(ds.current_row(), Some(ds.row_ids()[0]));
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("Reset"));
    }

    #[test]
    fn test_reject_restores_origin_and_keeps_current() {
        let mut ds = dataset();
        let records: Vec<JsonMap> = serde_json::from_str(r#"[{"code":"A"},{"code":"B"}]"#).unwrap();
        ds.load_rows(&records);
        let second = ds.row_ids()[1];
        ds.set_current_row(Some(second));
        ds.set_column_value(second, "code", "changed").unwrap();
        let added = add(&mut ds, "C", "1");
        ds.set_current_row(Some(second));

        ds.reject_changes();
        assert_eq!(ds.len(), 2);
        assert!(ds.row(added).is_none());
        assert_eq!(ds.value(second, "code").unwrap(), &Value::from("B"));
        assert_eq!(ds.current_row(), Some(second));

        ds.reject_changes();
        assert_eq!(ds.value(second, "code").unwrap(), &Value::from("B"));
    }

    #[test]
    fn test_clear_is_not_undoable() {
        let mut ds = dataset();
        let records: Vec<JsonMap> = serde_json::from_str(r#"[{"code":"A"}]"#).unwrap();
        ds.load_rows(&records);
        ds.clear();
        ds.reject_changes();
        assert_eq!(ds.len(), 0);
        assert_eq!(ds.current_row(), None);
        assert_eq!(ds.total_rows(), 0);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut ds = dataset();
        let a = add(&mut ds, "A", "1");
        let snapshot = ds.snap_data();
        add(&mut ds, "B", "2");
        ds.set_column_value(a, "code", "Z").unwrap();

        ds.reset_data(snapshot);
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.value(a, "code").unwrap(), &Value::from("A"));
        assert_eq!(ds.current_row(), Some(a));
    }

    #[test]
    fn test_total_rows_falls_back_to_row_count() {
        let mut ds = dataset();
        assert_eq!(ds.total_rows(), 0);
        add(&mut ds, "A", "1");
        assert_eq!(ds.total_rows(), 1);
        ds.set_total_rows(40);
        assert_eq!(ds.total_rows(), 40);
    }

    #[test]
    fn test_navigation() {
        let mut ds = dataset();
        let a = add(&mut ds, "A", "1");
        let b = add(&mut ds, "B", "1");
        let c = add(&mut ds, "C", "1");
        ds.move_first();
        assert_eq!(ds.current_row(), Some(a));
        ds.move_next();
        assert_eq!(ds.current_row(), Some(b));
        ds.move_last();
        assert_eq!(ds.current_row(), Some(c));
        ds.move_prev();
        assert_eq!(ds.current_row(), Some(b));
        ds.move_next();
        ds.move_next();
        assert_eq!(ds.current_row(), None, "moving past the end leaves no current row");
    }

    #[test]
    fn test_next_id_memoized_and_reset() {
        let mut ds = dataset();
        add(&mut ds, "A", "7");
        assert_eq!(ds.next_id("qty").unwrap(), Some(8));
        assert_eq!(ds.next_id("qty").unwrap(), Some(9));
        assert_eq!(ds.next_id("code").unwrap(), None);

        ds.clear();
        assert_eq!(ds.next_id("qty").unwrap(), Some(1));
        assert_eq!(ds.next_id("qty").unwrap(), Some(2));
    }

    #[test]
    fn test_aggregates_are_decimal_safe() {
        let mut ds = dataset();
        add(&mut ds, "A", "0.1");
        add(&mut ds, "B", "0.2");
        add(&mut ds, "C", "-4");

        assert_eq!(ds.sum_column("qty", 0, 1).unwrap().unwrap().to_string(), "0.30");
        assert_eq!(ds.sum_column("qty", 0, 99).unwrap().unwrap().to_string(), "-3.70");
        assert_eq!(ds.average_column("qty", 0, 1).unwrap().unwrap().to_string(), "0.15");
        assert_eq!(ds.max_column("qty", 0, 2).unwrap().unwrap().to_string(), "0.2");
        assert_eq!(ds.min_column("qty", 0, 2).unwrap().unwrap().to_string(), "-4");
        assert_eq!(ds.sum_column("code", 0, 2).unwrap(), None);
    }

    #[test]
    fn test_aggregate_overflow_is_an_error() {
        let mut ds = dataset();
        add(&mut ds, "A", "99999999999999999999999999999999999999");
        add(&mut ds, "B", "99999999999999999999999999999999999999");

        assert!(matches!(ds.sum_column("qty", 0, 1), Err(RowsetError::Overflow(_))));
        assert!(matches!(ds.average_column("qty", 0, 1), Err(RowsetError::Overflow(_))));
        assert_eq!(
            ds.sum_column("qty", 0, 0).unwrap().unwrap().to_string(),
            "99999999999999999999999999999999999999"
        );
        assert!(ds.max_column("qty", 0, 1).unwrap().is_some());
    }

    #[test]
    fn test_blank_values_count_as_zero() {
        let mut ds = dataset();
        add(&mut ds, "A", "3");
        let blank = ds.register_row(ds.blank_row());
        ds.publish_added(blank).unwrap();
        ds.set_column_value(blank, "code", "B").unwrap();
        add(&mut ds, "C", "6");

        assert_eq!(ds.average_column("qty", 0, 2).unwrap().unwrap().to_string(), "3.00");
        assert_eq!(ds.average_column("qty", 0, 1).unwrap().unwrap().to_string(), "1.50");
        assert_eq!(ds.max_column("qty", 0, 2).unwrap().unwrap().to_string(), "6");
        assert_eq!(ds.min_column("qty", 0, 2).unwrap().unwrap().to_string(), "0");
        assert_eq!(ds.min_column("qty", 2, 2).unwrap().unwrap().to_string(), "6");
    }

    #[test]
    fn test_duplicate_key() {
        let mut ds = dataset();
        add(&mut ds, "A", "1");
        let b = add(&mut ds, "A", "2");
        let err = ds.check_multi_field(b).unwrap().unwrap_err();
        assert_eq!(err.kind, ColumnErrorKind::DuplicateKey);
        assert_eq!(err.message, "Line 1: code already used");
    }

    #[test]
    fn test_is_empty() {
        let mut ds = dataset();
        assert!(ds.is_empty());
        let id = ds.register_row(ds.blank_row());
        ds.publish_added(id).unwrap();
        assert!(ds.is_empty());
        ds.set_column_value(id, "code", "x").unwrap();
        assert!(!ds.is_empty());
    }
}
