//! The column edit pipeline: convert, validate, resolve references, assign
//! inside a row transaction, cascade to property aliases, and roll back
//! when the edit introduces a new error.

use super::{Dataset, ObjectPayload, QueryParams, RefQuery, SearchRequest};
use crate::column::{enum_ref_item, resolve_ref_obj_code, RefItem};
use crate::error::{Result, RowsetError};
use crate::event::{CollectionAction, Event, JsonMap};
use crate::messages;
use crate::row::RowId;
use crate::transport::{EnumProvider, Transport};
use crate::validation::{self, ColumnError};
use crate::value::Value;
use std::collections::BTreeMap;

/// Collaborators an edit may call out to
pub(crate) struct Services<'s> {
    pub transport: &'s mut dyn Transport,
    pub enums: &'s dyn EnumProvider,
}

/// What a detail dataset needs to know about its master while editing
#[derive(Debug, Clone, Default)]
pub(crate) struct MasterContext {
    /// Wire form of the master current row; `Some` whenever a master exists
    pub row_data: Option<JsonMap>,
    /// Detail key column -> value from the master current row
    pub key_values: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy)]
enum ErrorHook {
    Type,
    Width,
    Rule,
    StrictRef,
}

pub(crate) struct Editor<'e> {
    ds: &'e mut Dataset,
    services: Services<'e>,
    master: &'e MasterContext,
    touched: Vec<usize>,
}

impl<'e> Editor<'e> {
    pub fn new(ds: &'e mut Dataset, services: Services<'e>, master: &'e MasterContext) -> Self {
        Editor {
            ds,
            services,
            master,
            touched: Vec::new(),
        }
    }

    /// Columns whose value was committed during this edit
    pub fn into_touched(self) -> Vec<usize> {
        let mut touched = self.touched;
        touched.sort_unstable();
        touched.dedup();
        touched
    }

    /// Run one edit. Returns false when the value was rejected; the reason is
    /// recorded as the column's error. Re-entrant edits of a column that is
    /// already being edited are ignored.
    pub fn set_column_text(&mut self, row: RowId, index: usize, raw: Value) -> Result<bool> {
        if !self.ds.row_mut(row)?.lock(index) {
            return Ok(true);
        }
        let result = self.edit(row, index, raw);
        if let Ok(r) = self.ds.row_mut(row) {
            r.unlock(index);
        }
        result
    }

    fn edit(&mut self, row: RowId, index: usize, raw: Value) -> Result<bool> {
        let column = &self.ds.columns[index];
        let value = column.convert(raw);
        let current = self.ds.require_row(row)?;
        if current.error(column.field_name()).is_none() && value.same_as(current.value(index)) {
            return Ok(true);
        }

        if !self.validate_column(row, index, &value)? {
            return Ok(false);
        }
        self.calc_column_value(row, index, value)
    }

    fn validate_column(&mut self, row: RowId, index: usize, value: &Value) -> Result<bool> {
        let precision = self.precision(row, index);
        let staged = {
            let column = &self.ds.columns[index];
            let def = column.definition();
            validation::check_type(def, value)
                .map_err(|e| (e, ErrorHook::Type))
                .and_then(|_| validation::check_width(def, value, precision).map_err(|e| (e, ErrorHook::Width)))
                .and_then(|_| validation::check_rule(def, column.rule(), value).map_err(|e| (e, ErrorHook::Rule)))
        };
        if let Err((error, hook)) = staged {
            return self.record(row, index, error, hook);
        }

        let column = &self.ds.columns[index];
        if column.is_table_ref() || column.is_enum_ref() {
            let strict = column.definition().is_strict_ref;
            match self.load_reference(row, index, value, false, true) {
                Ok(()) => {}
                Err(RowsetError::Transport(e)) if strict => {
                    let def = self.ds.columns[index].definition();
                    let message = messages::format(
                        messages::REF_LOOKUP_FAILED,
                        &[def.display_name(), &e.to_string()],
                    );
                    let field = def.field_name.clone();
                    self.ds.row_mut(row)?.set_error(&field, &message);
                    return Ok(false);
                }
                // A lenient column keeps the value unresolved
                Err(RowsetError::Transport(_)) => {}
                Err(e) => return Err(e),
            }

            let column = &self.ds.columns[index];
            let def = column.definition();
            let wildcard = def
                .match_char
                .as_deref()
                .is_some_and(|m| value.to_string() == m);
            if !wildcard && !value.is_blank() && def.is_strict_ref && column.ref_item().is_none() {
                let error = validation::strict_reference_error(def, value);
                return self.record(row, index, error, ErrorHook::StrictRef);
            }
        }

        let field = self.ds.columns[index].field_name().to_string();
        let mut event = Event::ColumnValidate {
            row,
            column: field.clone(),
            value: value.clone(),
            cancel: false,
            message: None,
        };
        self.ds.emit(&mut event);
        if let Event::ColumnValidate {
            cancel: true,
            message,
            ..
        } = event
        {
            if let Some(message) = message.filter(|m| !m.is_empty()) {
                self.ds.row_mut(row)?.set_error(&field, &message);
            }
            return Ok(false);
        }
        Ok(true)
    }

    /// Decimal places accepted for a number, overridable per row
    fn precision(&mut self, row: RowId, index: usize) -> u32 {
        let column = &self.ds.columns[index];
        let mut event = Event::Precision {
            row,
            column: column.field_name().to_string(),
            precision: column.definition().data_dec,
        };
        self.ds.emit(&mut event);
        match event {
            Event::Precision { precision, .. } => precision,
            _ => self.ds.columns[index].definition().data_dec,
        }
    }

    /// Let subscribers rewrite a validation message, then record it
    fn record(&mut self, row: RowId, index: usize, error: ColumnError, hook: ErrorHook) -> Result<bool> {
        let column = self.ds.columns[index].field_name().to_string();
        let message = error.message;
        let mut event = match hook {
            ErrorHook::Type => Event::DataTypeError { row, column: column.clone(), message },
            ErrorHook::Width => Event::DataWidthError { row, column: column.clone(), message },
            ErrorHook::Rule => Event::DataRuleError { row, column: column.clone(), message },
            ErrorHook::StrictRef => Event::StrictRefError { row, column: column.clone(), message },
        };
        self.ds.emit(&mut event);
        let message = match event {
            Event::DataTypeError { message, .. }
            | Event::DataWidthError { message, .. }
            | Event::DataRuleError { message, .. }
            | Event::StrictRefError { message, .. } => message,
            _ => String::new(),
        };
        self.ds.row_mut(row)?.set_error(&column, &message);
        Ok(false)
    }

    fn calc_column_value(&mut self, row: RowId, index: usize, value: Value) -> Result<bool> {
        let field = self.ds.columns[index].field_name().to_string();
        let tx = self.ds.row_mut(row)?.begin_transaction();

        let ref_text = self.ds.columns[index].ref_text();
        self.ds.row_mut(row)?.set_ref_text(index, ref_text);
        self.ds.assign(row, index, value)?;
        self.ds.notify(Event::ValueChanged {
            row,
            column: field.clone(),
        });

        if let Some(message) = self.cascade_aliases(row, index)? {
            if self.ds.row_mut(row)?.rollback(tx) {
                self.ds.notify(Event::CollectionChanged {
                    action: CollectionAction::Replace,
                    row: Some(row),
                });
            }
            self.ds.row_mut(row)?.set_error(&field, &message);
            return Ok(false);
        }

        let mut event = Event::FieldChanged {
            row,
            column: field.clone(),
            error: None,
        };
        self.ds.emit(&mut event);
        if let Event::FieldChanged {
            error: Some(message),
            ..
        } = event
        {
            self.ds.row_mut(row)?.set_error(&field, &message);
        }

        let r = self.ds.row_mut(row)?;
        let introduced = r
            .transaction_errors()
            .is_some_and(|before| r.errors().introduces_new(before));
        if introduced {
            let kept = r.error(&field).map(str::to_string);
            if r.rollback(tx) {
                self.ds.notify(Event::CollectionChanged {
                    action: CollectionAction::Replace,
                    row: Some(row),
                });
            }
            if let Some(message) = kept {
                self.ds.row_mut(row)?.set_error(&field, &message);
            }
            return Ok(false);
        }

        self.ds.row_mut(row)?.commit(tx);
        self.touched.push(index);
        Ok(true)
    }

    /// Push the resolved reference item into every property alias of a
    /// reference column. Returns the first alias error.
    fn cascade_aliases(&mut self, row: RowId, index: usize) -> Result<Option<String>> {
        if !self.ds.columns[index].is_table_ref() {
            return Ok(None);
        }
        let aliases: Vec<usize> = (0..self.ds.columns.len())
            .filter(|&i| i != index && self.ds.columns[i].is_alias_of(&self.ds.columns[index]))
            .collect();

        for alias in aliases {
            let (value, item, owner, items) = {
                let source = &self.ds.columns[index];
                let target = self.ds.columns[alias].definition().ref_field.as_deref();
                (
                    source.ref_value(target),
                    source.ref_item().cloned(),
                    source.ref_owner(),
                    source.ref_items().to_vec(),
                )
            };
            let column = &mut self.ds.columns[alias];
            column.set_ref_items(items);
            column.set_ref_item(item, owner);

            self.set_column_text(row, alias, value)?;
            let alias_field = self.ds.columns[alias].field_name();
            if let Some(message) = self.ds.require_row(row)?.error(alias_field) {
                log::debug!("{}: alias {alias_field} rejected the cascade", self.ds.id());
                return Ok(Some(message.to_string()));
            }
        }
        Ok(None)
    }

    /// Apply relation key values, column defaults and the default-value hook
    /// to a freshly created row.
    pub fn apply_defaults(&mut self, row: RowId) -> Result<()> {
        for index in 0..self.ds.columns.len() {
            let field = self.ds.columns[index].field_name().to_string();
            let value = self
                .master
                .key_values
                .get(&field)
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| self.ds.columns[index].default_value());

            let mut event = Event::DefaultValue {
                row,
                column: field,
                value,
            };
            self.ds.emit(&mut event);
            let Event::DefaultValue { value, .. } = event else {
                continue;
            };
            if value.is_blank() || value == Value::Boolean(false) {
                continue;
            }
            self.set_column_text(row, index, value)?;
        }
        Ok(())
    }

    /// Resolve the reference item and candidate list of a column for `value`.
    /// With `ignore_value` every candidate is loaded; with `edit` the row
    /// being edited and the edit-time enum filter are applied. A failed table
    /// lookup is returned as [`RowsetError::Transport`] with the cache cleared.
    pub fn load_reference(
        &mut self,
        row: RowId,
        index: usize,
        value: &Value,
        ignore_value: bool,
        edit: bool,
    ) -> Result<()> {
        let column = &self.ds.columns[index];
        if !ignore_value && column.is_resolved_for(row, value) {
            return Ok(());
        }

        if column.is_enum_ref() {
            let enum_id = column.definition().ref_obj.clone().unwrap_or_default();
            let allowed: Option<Vec<String>> = column
                .definition()
                .ref_edit_where
                .as_deref()
                .filter(|_| edit)
                .filter(|w| !w.trim().is_empty())
                .map(|w| w.split(',').map(|c| c.trim().to_string()).collect());

            let items: Vec<RefItem> = self
                .services
                .enums
                .items(&enum_id)
                .unwrap_or_default()
                .iter()
                .filter(|item| allowed.as_ref().map_or(true, |codes| codes.contains(&item.code)))
                .map(enum_ref_item)
                .collect();
            let items = self.user_ref_data(row, index, items);
            let code = value.to_string();
            let item = items
                .iter()
                .find(|i| i.get("code").is_some_and(|c| c.to_string() == code))
                .cloned();

            let column = &mut self.ds.columns[index];
            column.set_ref_item(item, Some(row));
            column.set_ref_items(items);
            return Ok(());
        }

        if !column.is_table_ref() {
            return Ok(());
        }
        self.ds.columns[index].clear_reference();
        if !ignore_value && value.is_blank() {
            return Ok(());
        }

        let column = &self.ds.columns[index];
        let wildcard = column
            .definition()
            .match_char
            .as_deref()
            .is_some_and(|m| value.to_string() == m);
        if !ignore_value && wildcard {
            let mut item: RefItem = self
                .ds
                .columns
                .iter()
                .map(|c| (c.field_name().to_lowercase(), c.default_value()))
                .collect();
            item.insert(column.field_name().to_lowercase(), value.clone());

            let column = &mut self.ds.columns[index];
            column.set_ref_items(vec![item.clone()]);
            column.set_ref_item(Some(item), Some(row));
            return Ok(());
        }

        let Some(obj_code) = resolve_ref_obj_code(&self.ds.columns, index).map(str::to_string) else {
            return Ok(());
        };

        let filter = self.user_ref_where(row, index, edit);
        let column = &self.ds.columns[index];
        let ref_query = RefQuery {
            field_name: column.field_name().to_string(),
            ui_obj_code: self.ds.id().to_string(),
            ref_field: column.definition().ref_field.clone(),
            user_ref_where: filter,
            value: value.to_json(),
            row: if edit {
                self.ds.require_row(row)?.get_data(&self.ds.columns)
            } else {
                JsonMap::new()
            },
            ignore_value,
            master: self.master.row_data.clone(),
        };
        let ref_query = match serde_json::to_value(&ref_query)? {
            serde_json::Value::Object(map) => map,
            _ => JsonMap::new(),
        };

        let payload = ObjectPayload {
            menu_id: self.ds.definition().menu_id.clone(),
            query_params: QueryParams {
                ref_query,
                ..Default::default()
            },
            ..Default::default()
        };
        let request = SearchRequest {
            before_proc: None,
            after_proc: None,
            search_data: BTreeMap::from([(obj_code.clone(), payload)]),
        };

        log::debug!(
            "{}.{}: reference lookup on {obj_code}",
            self.ds.id(),
            self.ds.columns[index].field_name()
        );
        let records = match self.services.transport.search(&request) {
            Ok(mut response) => response
                .remove(&obj_code)
                .and_then(|data| data.rows)
                .unwrap_or_default(),
            Err(e) => {
                log::warn!(
                    "Reference lookup for {}.{} failed: {e}",
                    self.ds.id(),
                    self.ds.columns[index].field_name()
                );
                return Err(e.into());
            }
        };

        let items: Vec<RefItem> = records
            .iter()
            .map(|record| {
                record
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), Value::from_json(v)))
                    .collect()
            })
            .collect();
        let items = self.user_ref_data(row, index, items);

        let column = &mut self.ds.columns[index];
        column.set_ref_item(items.first().cloned(), Some(row));
        column.set_ref_items(items);
        Ok(())
    }

    fn user_ref_where(&mut self, row: RowId, index: usize, edit: bool) -> JsonMap {
        let mut event = Event::UserRefWhere {
            row,
            column: self.ds.columns[index].field_name().to_string(),
            edit,
            filter: JsonMap::new(),
        };
        self.ds.emit(&mut event);
        match event {
            Event::UserRefWhere { filter, .. } => filter,
            _ => JsonMap::new(),
        }
    }

    fn user_ref_data(&mut self, row: RowId, index: usize, items: Vec<RefItem>) -> Vec<RefItem> {
        let mut event = Event::UserRefData {
            row,
            column: self.ds.columns[index].field_name().to_string(),
            items,
        };
        self.ds.emit(&mut event);
        match event {
            Event::UserRefData { items, .. } => items,
            _ => Vec::new(),
        }
    }
}
