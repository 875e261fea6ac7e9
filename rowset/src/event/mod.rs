//! Per-dataset publish/subscribe.
//!
//! Notifications carry owned payloads. Hooks are the events whose payload has
//! outcome fields (`cancel`, `message`, `value`, ...): handlers mutate them in
//! place and the dataset reads them back after dispatch. Dispatch is
//! synchronous, in subscription order.

use crate::column::RefItem;
use crate::dataset::QueryParams;
use crate::row::RowId;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionAction {
    Add,
    Remove,
    Replace,
    Move,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RowAdded,
    RowRemoved,
    RowDeleting,
    RowDeleted,
    CollectionChanged,
    CurrentChanged,
    ValueChanged,
    FieldChanged,
    PropertyChanged,
    Cleared,
    Error,
    BeforeLoad,
    AfterLoad,
    BeforeSearch,
    AfterSearch,
    BeforeSave,
    AfterSave,
    StoredProcParams,
    DataTypeError,
    DataWidthError,
    DataRuleError,
    StrictRefError,
    Precision,
    DefaultValue,
    QueryParams,
    UserRefWhere,
    UserRefData,
    ColumnValidate,
    RowValidate,
    UpdateValue,
    MultiMessage,
    FieldReadOnly,
}

#[derive(Debug, Clone)]
pub enum Event {
    RowAdded { row: RowId },
    RowRemoved { row: RowId },
    /// Set `cancel` to keep the row
    RowDeleting { row: RowId, need_confirm: bool, cancel: bool },
    RowDeleted { row: RowId },
    CollectionChanged { action: CollectionAction, row: Option<RowId> },
    CurrentChanged { old: Option<RowId>, new: Option<RowId> },
    ValueChanged { row: RowId, column: String },
    /// Fired after a committed-to-be edit; setting `error` records it on the
    /// column and rolls the edit back
    FieldChanged { row: RowId, column: String, error: Option<String> },
    PropertyChanged { property: String },
    Cleared,
    Error { message: String },
    BeforeLoad { rows: usize },
    AfterLoad { ok: bool },
    BeforeSearch { cancel: bool },
    AfterSearch { ok: bool },
    BeforeSave { cancel: bool },
    AfterSave { ok: bool },
    /// Current IN/INOUT parameter values; handler edits are written back
    StoredProcParams { params: BTreeMap<String, Value> },
    DataTypeError { row: RowId, column: String, message: String },
    DataWidthError { row: RowId, column: String, message: String },
    DataRuleError { row: RowId, column: String, message: String },
    StrictRefError { row: RowId, column: String, message: String },
    Precision { row: RowId, column: String, precision: u32 },
    DefaultValue { row: RowId, column: String, value: Value },
    QueryParams { params: QueryParams },
    UserRefWhere { row: RowId, column: String, edit: bool, filter: JsonMap },
    UserRefData { row: RowId, column: String, items: Vec<RefItem> },
    ColumnValidate { row: RowId, column: String, value: Value, cancel: bool, message: Option<String> },
    RowValidate { row: RowId, data: JsonMap, cancel: bool, message: String },
    /// Before-save value update: set `value` to replace the column value
    UpdateValue { row: RowId, column: String, value: Option<Value> },
    MultiMessage { row: RowId, message: String },
    FieldReadOnly { row: RowId, column: String, read_only: bool },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RowAdded { .. } => EventKind::RowAdded,
            Event::RowRemoved { .. } => EventKind::RowRemoved,
            Event::RowDeleting { .. } => EventKind::RowDeleting,
            Event::RowDeleted { .. } => EventKind::RowDeleted,
            Event::CollectionChanged { .. } => EventKind::CollectionChanged,
            Event::CurrentChanged { .. } => EventKind::CurrentChanged,
            Event::ValueChanged { .. } => EventKind::ValueChanged,
            Event::FieldChanged { .. } => EventKind::FieldChanged,
            Event::PropertyChanged { .. } => EventKind::PropertyChanged,
            Event::Cleared => EventKind::Cleared,
            Event::Error { .. } => EventKind::Error,
            Event::BeforeLoad { .. } => EventKind::BeforeLoad,
            Event::AfterLoad { .. } => EventKind::AfterLoad,
            Event::BeforeSearch { .. } => EventKind::BeforeSearch,
            Event::AfterSearch { .. } => EventKind::AfterSearch,
            Event::BeforeSave { .. } => EventKind::BeforeSave,
            Event::AfterSave { .. } => EventKind::AfterSave,
            Event::StoredProcParams { .. } => EventKind::StoredProcParams,
            Event::DataTypeError { .. } => EventKind::DataTypeError,
            Event::DataWidthError { .. } => EventKind::DataWidthError,
            Event::DataRuleError { .. } => EventKind::DataRuleError,
            Event::StrictRefError { .. } => EventKind::StrictRefError,
            Event::Precision { .. } => EventKind::Precision,
            Event::DefaultValue { .. } => EventKind::DefaultValue,
            Event::QueryParams { .. } => EventKind::QueryParams,
            Event::UserRefWhere { .. } => EventKind::UserRefWhere,
            Event::UserRefData { .. } => EventKind::UserRefData,
            Event::ColumnValidate { .. } => EventKind::ColumnValidate,
            Event::RowValidate { .. } => EventKind::RowValidate,
            Event::UpdateValue { .. } => EventKind::UpdateValue,
            Event::MultiMessage { .. } => EventKind::MultiMessage,
            Event::FieldReadOnly { .. } => EventKind::FieldReadOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Receives the source dataset id and the event
pub type Handler = Box<dyn FnMut(&str, &mut Event)>;

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
}

impl EventBus {
    pub fn subscribe(&mut self, kind: EventKind, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscriptions.push(Subscription { id, kind, handler });
        id
    }

    /// Returns false when the subscription was not found
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        self.subscriptions.iter().any(|s| s.kind == kind)
    }

    pub fn emit(&mut self, source: &str, event: &mut Event) {
        let kind = event.kind();
        for subscription in self.subscriptions.iter_mut().filter(|s| s.kind == kind) {
            (subscription.handler)(source, event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
