use crate::column::Column;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Row identity: a per-dataset sequence number, unrelated to business keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowState {
    #[default]
    Detached,
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl RowState {
    /// Rows in these states take part in persistence
    pub fn is_changed(self) -> bool {
        !matches!(self, RowState::Unchanged | RowState::Detached)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ErrorEntry {
    column: String,
    message: String,
    token: u64,
}

/// Per-column error messages. Each entry carries a token that survives
/// re-setting the same message, so a repeated identical error is not "new".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorList {
    entries: Vec<ErrorEntry>,
    next_token: u64,
}

impl ErrorList {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.column == column)
            .map(|e| e.message.as_str())
    }

    pub fn set(&mut self, column: &str, message: &str) {
        self.next_token += 1;
        let token = self.next_token;
        match self.entries.iter_mut().find(|e| e.column == column) {
            Some(entry) if entry.message == message => {}
            Some(entry) => {
                entry.message = message.to_string();
                entry.token = token;
            }
            None => self.entries.push(ErrorEntry {
                column: column.to_string(),
                message: message.to_string(),
                token,
            }),
        }
    }

    pub fn clear(&mut self, column: &str) {
        self.entries.retain(|e| e.column != column);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(column, message)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.column.as_str(), e.message.as_str()))
    }

    /// True when some current error was not present in `before`
    pub fn introduces_new(&self, before: &ErrorList) -> bool {
        self.entries
            .iter()
            .any(|e| !before.entries.iter().any(|b| b.token == e.token && b.column == e.column))
    }
}

/// Versioned pre-edit copy of a row, restored as a whole on rollback
#[derive(Debug, Clone)]
struct Snapshot {
    version: u64,
    values: Vec<Value>,
    ref_texts: Vec<Option<String>>,
    errors: ErrorList,
    state: RowState,
}

/// Handle returned by [`Row::begin_transaction`]. Only the outermost
/// transaction owns the snapshot; nested ones commit and roll back as no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction(Option<u64>);

impl Transaction {
    pub fn is_outermost(&self) -> bool {
        self.0.is_some()
    }
}

/// One record of a dataset: a value slot and an optional reference display
/// text per column, the origin values as of the last accept, and an error list.
#[derive(Debug, Clone)]
pub struct Row {
    id: RowId,
    state: RowState,
    values: Vec<Value>,
    ref_texts: Vec<Option<String>>,
    origin_values: Vec<Value>,
    origin_ref_texts: Vec<Option<String>>,
    errors: ErrorList,
    locks: Vec<bool>,
    snapshot: Option<Snapshot>,
    version: u64,
    selected: bool,
    details: BTreeMap<String, RowStore>,
}

impl Row {
    /// A detached row with every value null
    pub fn new(column_count: usize) -> Self {
        Row {
            id: RowId(0),
            state: RowState::Detached,
            values: vec![Value::Null; column_count],
            ref_texts: vec![None; column_count],
            origin_values: vec![Value::Null; column_count],
            origin_ref_texts: vec![None; column_count],
            errors: ErrorList::default(),
            locks: vec![false; column_count],
            snapshot: None,
            version: 0,
            selected: false,
            details: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: RowId) {
        self.id = id;
    }

    pub fn state(&self) -> RowState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RowState) {
        self.state = state;
    }

    pub fn value(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&Value::Null)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn origin_value(&self, index: usize) -> &Value {
        self.origin_values.get(index).unwrap_or(&Value::Null)
    }

    pub fn ref_text(&self, index: usize) -> Option<&str> {
        self.ref_texts.get(index).and_then(|t| t.as_deref())
    }

    pub(crate) fn set_ref_text(&mut self, index: usize, text: Option<String>) {
        if let Some(slot) = self.ref_texts.get_mut(index) {
            *slot = text;
        }
    }

    /// Store a value, clear the column's error and mark the row modified.
    /// No validation and no notification.
    pub(crate) fn assign(&mut self, column: &Column, value: Value) {
        if let Some(slot) = self.values.get_mut(column.index()) {
            *slot = value;
        }
        self.errors.clear(column.field_name());
        if self.state == RowState::Unchanged {
            self.state = RowState::Modified;
        }
    }

    pub fn error(&self, column: &str) -> Option<&str> {
        self.errors.get(column)
    }

    /// Record an error. An error is itself a pending change, so an
    /// unchanged row becomes modified.
    pub fn set_error(&mut self, column: &str, message: &str) {
        if self.state == RowState::Unchanged {
            self.state = RowState::Modified;
        }
        log::debug!("row {}: {column}: {message}", self.id);
        self.errors.set(column, message);
    }

    pub fn clear_error(&mut self, column: &str) {
        self.errors.clear(column);
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &ErrorList {
        &self.errors
    }

    /// All error messages, one per line
    pub fn error_text(&self) -> String {
        self.errors.iter().map(|(_, m)| format!("{m}\n")).collect()
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    /// Take the per-column edit lock. Returns false when an edit of this
    /// column is already in flight.
    pub(crate) fn lock(&mut self, index: usize) -> bool {
        match self.locks.get_mut(index) {
            Some(lock) if !*lock => {
                *lock = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn unlock(&mut self, index: usize) {
        if let Some(lock) = self.locks.get_mut(index) {
            *lock = false;
        }
    }

    pub fn accept_changes(&mut self) {
        if self.state == RowState::Deleted {
            return;
        }
        self.state = RowState::Unchanged;
        self.origin_values = self.values.clone();
        self.origin_ref_texts = self.ref_texts.clone();
    }

    pub fn reject_changes(&mut self) {
        if self.state != RowState::Unchanged {
            self.state = RowState::Unchanged;
            self.values = self.origin_values.clone();
            self.ref_texts = self.origin_ref_texts.clone();
        }
        self.errors.clear_all();
    }

    pub fn begin_transaction(&mut self) -> Transaction {
        if self.snapshot.is_some() {
            return Transaction(None);
        }
        self.version += 1;
        self.snapshot = Some(Snapshot {
            version: self.version,
            values: self.values.clone(),
            ref_texts: self.ref_texts.clone(),
            errors: self.errors.clone(),
            state: self.state,
        });
        Transaction(Some(self.version))
    }

    fn owns(&self, tx: Transaction) -> bool {
        matches!((tx.0, &self.snapshot), (Some(v), Some(s)) if s.version == v)
    }

    pub fn commit(&mut self, tx: Transaction) {
        if self.owns(tx) {
            self.snapshot = None;
        }
    }

    /// Restore the pre-edit values, texts, errors and state.
    /// Returns true when a snapshot was restored.
    pub fn rollback(&mut self, tx: Transaction) -> bool {
        if !self.owns(tx) {
            return false;
        }
        match self.snapshot.take() {
            Some(snapshot) => {
                self.values = snapshot.values;
                self.ref_texts = snapshot.ref_texts;
                self.errors = snapshot.errors;
                self.state = snapshot.state;
                true
            }
            None => false,
        }
    }

    /// Errors as they were when the open transaction started
    pub fn transaction_errors(&self) -> Option<&ErrorList> {
        self.snapshot.as_ref().map(|s| &s.errors)
    }

    /// Wire representation: current values, `old_<field>` origin values and `$state`
    pub fn get_data(&self, columns: &[Column]) -> serde_json::Map<String, serde_json::Value> {
        let mut data = serde_json::Map::new();
        for column in columns {
            let name = column.field_name();
            data.insert(name.to_string(), self.value(column.index()).to_json());
            data.insert(
                format!("old_{name}"),
                self.origin_value(column.index()).to_json(),
            );
        }
        data.insert(
            "$state".into(),
            serde_json::to_value(self.state).unwrap_or(serde_json::Value::Null),
        );
        data
    }

    /// Load a server record. Keys match the field name exactly or lower-cased;
    /// `<field>$` keys carry the reference display text.
    pub fn load_data(&mut self, columns: &[Column], record: &serde_json::Map<String, serde_json::Value>) {
        for column in columns {
            let name = column.field_name();
            let lower = name.to_lowercase();
            for key in [lower.as_str(), name] {
                if let Some(raw) = record.get(key) {
                    let value = column.convert(Value::from_json(raw));
                    if let Some(slot) = self.values.get_mut(column.index()) {
                        *slot = value;
                    }
                }
                if let Some(text) = record.get(&format!("{key}$")) {
                    let text = match text {
                        serde_json::Value::Null => None,
                        serde_json::Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    };
                    self.set_ref_text(column.index(), text);
                }
            }
        }
    }

    /// True when every column counted toward emptiness is blank.
    /// A schema without such columns never produces empty rows.
    pub fn is_empty(&self, columns: &[Column]) -> bool {
        let mut counted = columns
            .iter()
            .filter(|c| c.definition().is_empty_row_field)
            .peekable();
        counted.peek().is_some() && counted.all(|c| self.value(c.index()).is_blank())
    }

    /// Detail rows parked on this master row, keyed by detail dataset id
    pub fn details(&self) -> &BTreeMap<String, RowStore> {
        &self.details
    }

    pub(crate) fn details_mut(&mut self) -> &mut BTreeMap<String, RowStore> {
        &mut self.details
    }
}

/// Live, deleted and origin row sequences of a dataset. Rows are owned by
/// the id map; the sequences hold ids.
#[derive(Debug, Clone, Default)]
pub struct RowStore {
    rows: BTreeMap<RowId, Row>,
    live: Vec<RowId>,
    deleted: Vec<RowId>,
    origin: Vec<RowId>,
}

impl RowStore {
    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.rows.get_mut(&id)
    }

    pub fn live_ids(&self) -> &[RowId] {
        &self.live
    }

    pub fn deleted_ids(&self) -> &[RowId] {
        &self.deleted
    }

    pub fn origin_ids(&self) -> &[RowId] {
        &self.origin
    }

    pub fn live(&self) -> impl Iterator<Item = &Row> {
        self.live.iter().filter_map(|id| self.rows.get(id))
    }

    pub fn deleted(&self) -> impl Iterator<Item = &Row> {
        self.deleted.iter().filter_map(|id| self.rows.get(id))
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn position(&self, id: RowId) -> Option<usize> {
        self.live.iter().position(|r| *r == id)
    }

    pub fn contains_live(&self, id: RowId) -> bool {
        self.live.contains(&id)
    }

    /// Register a row without making it live
    pub(crate) fn insert(&mut self, row: Row) {
        self.rows.insert(row.id(), row);
    }

    pub(crate) fn push_live(&mut self, id: RowId) {
        if !self.live.contains(&id) {
            self.live.push(id);
        }
    }

    /// Remove from the live sequence, returning the former position
    pub(crate) fn remove_live(&mut self, id: RowId) -> Option<usize> {
        let position = self.position(id)?;
        self.live.remove(position);
        Some(position)
    }

    pub(crate) fn push_deleted(&mut self, id: RowId) {
        if !self.deleted.contains(&id) {
            self.deleted.push(id);
        }
    }

    pub(crate) fn rows_mut(&mut self) -> impl Iterator<Item = &mut Row> {
        self.rows.values_mut()
    }

    /// Every live row becomes origin, deleted rows are forgotten.
    pub(crate) fn accept(&mut self) {
        for id in &self.live {
            if let Some(row) = self.rows.get_mut(id) {
                row.accept_changes();
            }
        }
        self.origin = self.live.clone();
        self.deleted.clear();
        self.collect_garbage();
    }

    /// Rebuild the live sequence from origin, rejecting each restored row.
    pub(crate) fn reject(&mut self) {
        self.live = self.origin.clone();
        for id in &self.live {
            if let Some(row) = self.rows.get_mut(id) {
                row.reject_changes();
            }
        }
        self.deleted.clear();
        self.collect_garbage();
    }

    /// Delete every live row of a parked store: added rows vanish,
    /// the rest move to the deleted sequence.
    pub(crate) fn cascade_delete(&mut self) {
        for id in std::mem::take(&mut self.live) {
            let Some(row) = self.rows.get_mut(&id) else {
                continue;
            };
            if row.state() == RowState::Added {
                continue;
            }
            row.set_state(RowState::Deleted);
            self.push_deleted(id);
        }
        self.collect_garbage();
    }

    /// Drop empty live rows without recording deletions
    pub(crate) fn remove_empty(&mut self, columns: &[Column]) {
        let rows = &self.rows;
        self.live
            .retain(|id| rows.get(id).is_some_and(|r| !r.is_empty(columns)));
        self.collect_garbage();
    }

    fn collect_garbage(&mut self) {
        let RowStore {
            rows,
            live,
            deleted,
            origin,
        } = self;
        rows.retain(|id, _| live.contains(id) || deleted.contains(id) || origin.contains(id));
    }
}
