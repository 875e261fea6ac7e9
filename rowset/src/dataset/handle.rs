use super::{
    Dataset, DefaultQuery, Editor, ObjectPayload, PayloadArgs, QueryParams, Response, SaveRequest,
    SchemaPayload, SearchRequest,
};
use crate::column::RefListEntry;
use crate::error::{Result, RowsetError};
use crate::event::{CollectionAction, Event, EventKind};
use crate::messages;
use crate::registry::Registry;
use crate::row::{Row, RowId, RowState};
use crate::transport::TransportError;
use crate::validation::{self, ValidationResult};
use crate::value::Value;

enum RowCheck {
    Passed,
    Empty,
    Failed(Vec<String>),
}

/// A handle to one dataset of a [`Registry`].
///
/// Edits, deletions, validation, searches and saves go through here because
/// they may touch the master (totals), the details (key propagation, deep
/// validation and payloads) or the transport.
pub struct DatasetMut<'a> {
    registry: &'a mut Registry,
    id: String,
}

impl<'a> DatasetMut<'a> {
    pub(crate) fn new(registry: &'a mut Registry, id: &str) -> Self {
        DatasetMut {
            registry,
            id: id.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self) -> &Dataset {
        &self.registry.datasets[self.id.as_str()]
    }

    pub fn get_mut(&mut self) -> Result<&mut Dataset> {
        self.registry.get_mut(&self.id)
    }

    fn other(&mut self, id: &str) -> Result<DatasetMut<'_>> {
        self.registry.dataset(id)
    }

    fn edit<T>(&mut self, f: impl FnOnce(&mut Editor<'_>) -> Result<T>) -> Result<(T, Vec<usize>)> {
        let master = self.registry.master_context(&self.id)?;
        let (dataset, services) = self.registry.editor_parts(&self.id)?;
        let mut editor = Editor::new(dataset, services, &master);
        let out = f(&mut editor)?;
        Ok((out, editor.into_touched()))
    }

    /// Roll committed columns up into master totals, then push changed
    /// master keys down into the detail rows.
    fn after_edit(&mut self, row: RowId, touched: Vec<usize>, propagate: bool) -> Result<()> {
        if touched.is_empty() {
            return Ok(());
        }
        let fields: Vec<String> = touched
            .iter()
            .map(|&i| self.get().columns()[i].field_name().to_string())
            .collect();
        for field in &fields {
            self.update_parent(field)?;
        }
        if propagate && self.get().current_row() == Some(row) {
            self.propagate_fields(row, &fields)?;
        }
        Ok(())
    }

    // ── Rows ───────────────────────────────────────────────────────

    /// Append a new row with relation keys and defaults applied. The row
    /// becomes current.
    pub fn new_row(&mut self) -> Result<RowId> {
        let dataset = self.get_mut()?;
        let row = dataset.blank_row();
        let id = dataset.register_row(row);
        let (_, touched) = self.edit(|e| e.apply_defaults(id))?;
        self.get_mut()?.publish_added(id)?;
        self.after_edit(id, touched, false)?;
        Ok(id)
    }

    /// Append a prepared row as-is, without defaults
    pub fn add_row(&mut self, row: Row) -> Result<RowId> {
        let dataset = self.get_mut()?;
        let id = dataset.register_row(row);
        dataset.publish_added(id)?;
        self.aggregate_all()?;
        Ok(id)
    }

    /// The edit pipeline for one column. Returns false when the value was
    /// rejected; the reason is on the row as the column's error.
    pub fn set_column_text(&mut self, row: RowId, column: &str, value: impl Into<Value>) -> Result<bool> {
        let dataset = self.get();
        let index = dataset.column_index(column)?;
        if dataset.columns()[index].is_total() {
            return Err(RowsetError::Usage(format!(
                "column '{column}' of {} is a detail total and cannot be edited",
                self.id
            )));
        }
        dataset.require_row(row)?;

        let value = value.into();
        let (ok, touched) = self.edit(|e| e.set_column_text(row, index, value))?;
        self.after_edit(row, touched, true)?;
        Ok(ok)
    }

    /// Resolve a column's reference for `value` and return the candidate list
    pub fn load_reference(
        &mut self,
        row: RowId,
        column: &str,
        value: impl Into<Value>,
        ignore_value: bool,
        edit: bool,
    ) -> Result<Vec<RefListEntry>> {
        let index = self.get().column_index(column)?;
        self.get().require_row(row)?;
        let value = value.into();
        self.edit(|e| e.load_reference(row, index, &value, ignore_value, edit))?;
        Ok(self.get().columns()[index].ref_list())
    }

    /// Structural removal from the live rows. Not recorded as a deletion.
    pub fn remove_row(&mut self, row: RowId) -> Result<bool> {
        if self.get_mut()?.remove_live(row).is_none() {
            return Ok(false);
        }
        self.aggregate_all()?;
        Ok(true)
    }

    /// Delete a live row. Added rows are discarded; other rows are restored
    /// to their origin values and recorded as deleted, together with any
    /// detail rows parked on them.
    pub fn delete_row(&mut self, row: RowId, need_confirm: bool) -> Result<bool> {
        let dataset = self.get_mut()?;
        if !dataset.store.contains_live(row) {
            return Ok(false);
        }
        let mut event = Event::RowDeleting {
            row,
            need_confirm,
            cancel: false,
        };
        dataset.emit(&mut event);
        if matches!(event, Event::RowDeleting { cancel: true, .. }) {
            return Ok(false);
        }

        let state = dataset.require_row(row)?.state();
        if state != RowState::Added {
            dataset.row_mut(row)?.reject_changes();
        }
        self.remove_row(row)?;

        let dataset = self.get_mut()?;
        let target = dataset.row_mut(row)?;
        for parked in target.details_mut().values_mut() {
            parked.cascade_delete();
        }
        if matches!(state, RowState::Unchanged | RowState::Modified) {
            target.set_state(RowState::Deleted);
            dataset.store.push_deleted(row);
        }
        dataset.notify(Event::RowDeleted { row });
        Ok(true)
    }

    pub fn delete_all(&mut self) -> Result<()> {
        let rows = self.get().row_ids().to_vec();
        for row in rows.into_iter().rev() {
            self.delete_row(row, false)?;
        }
        Ok(())
    }

    /// Delete the current row on the server right away, then locally
    pub fn delete_current(&mut self) -> Result<bool> {
        let dataset = self.get();
        let Some(current) = dataset.current_row() else {
            return Err(RowsetError::Usage(messages::DELETE_NO_ROW.to_string()));
        };
        let args = PayloadArgs {
            deep: true,
            only_current: dataset.only_save_current,
            no_data: true,
            delete_current: true,
            ..Default::default()
        };
        let before_delete = dataset.procedures.before_delete.clone();
        let save_ext_class = dataset.save_ext_class.clone();

        let mut save_data = self.schema_data(&args)?;
        let before_proc = self.merge_proc(before_delete.as_deref(), &mut save_data)?;
        let request = SaveRequest {
            before_proc,
            after_proc: None,
            save_data,
            save_ext_class,
        };

        match self.request_save(&request) {
            Ok(_) => {
                self.delete_row(current, false)?;
                self.clear_details()?;
                let dataset = self.get_mut()?;
                dataset.accept_changes();
                if dataset.current_row().is_none() {
                    dataset.move_prev();
                }
                Ok(true)
            }
            Err(e) => {
                log::warn!("Delete in {} failed: {e}", self.id);
                self.get_mut()?.set_error(e.to_string());
                Ok(false)
            }
        }
    }

    fn clear_details(&mut self) -> Result<()> {
        let children = self.get().detail_ids().to_vec();
        for child in children {
            let mut detail = self.other(&child)?;
            detail.get_mut()?.clear();
            detail.clear_details()?;
        }
        Ok(())
    }

    // ── Accept / reject ────────────────────────────────────────────

    pub fn accept_changes(&mut self, deep: bool) -> Result<()> {
        self.get_mut()?.accept_changes();
        if deep {
            for child in self.get().detail_ids().to_vec() {
                self.other(&child)?.accept_changes(true)?;
            }
        }
        Ok(())
    }

    pub fn reject_changes(&mut self, deep: bool) -> Result<()> {
        self.get_mut()?.reject_changes();
        if deep {
            for child in self.get().detail_ids().to_vec() {
                self.other(&child)?.reject_changes(true)?;
            }
        }
        Ok(())
    }

    /// Pending changes including rows parked on master rows
    pub fn changes(&self) -> Result<Vec<&Row>> {
        self.registry.changes(&self.id)
    }

    pub fn all_rows(&self) -> Result<Vec<&Row>> {
        self.registry.all_rows(&self.id)
    }

    // ── Relations ──────────────────────────────────────────────────

    /// Sum of every totalled column into the master's current row
    fn aggregate_all(&mut self) -> Result<()> {
        let Some(relation) = self.get().parent_relation() else {
            return Ok(());
        };
        let fields: Vec<String> = relation.total_columns().keys().cloned().collect();
        for field in &fields {
            self.update_parent(field)?;
        }
        Ok(())
    }

    fn update_parent(&mut self, field: &str) -> Result<()> {
        let Some(relation) = self.get().parent_relation().cloned() else {
            return Ok(());
        };
        let Some(total_field) = relation.total_column(field) else {
            return Ok(());
        };
        let total = relation.total_value(self.get(), field);

        let mut master = self.other(relation.master())?;
        let Some(master_row) = master.get().current_row() else {
            return Ok(());
        };
        let total = match total {
            Ok(total) => total,
            Err(RowsetError::Overflow(what)) => {
                log::warn!("{what} overflows, {} keeps its last value", relation.master());
                let message = messages::format(messages::TOTAL_OVERFLOW, &[total_field]);
                master.get_mut()?.row_mut(master_row)?.set_error(total_field, &message);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let index = master.get().column_index(total_field)?;
        let scale = master.get().columns()[index].definition().data_dec;
        let value = Value::Number(total.round_dp(scale));
        let (_, touched) = master.edit(|e| e.set_column_text(master_row, index, value))?;
        master.after_edit(master_row, touched, false)
    }

    /// Copy every master key of `row` into the rows of each detail
    pub fn propagate_keys(&mut self, row: RowId) -> Result<()> {
        self.get().require_row(row)?;
        let fields: Vec<String> = self
            .get()
            .columns()
            .iter()
            .map(|c| c.field_name().to_string())
            .collect();
        self.propagate_fields(row, &fields)
    }

    fn propagate_fields(&mut self, row: RowId, fields: &[String]) -> Result<()> {
        for child in self.get().detail_ids().to_vec() {
            let Some(relation) = self.registry.get(&child)?.parent_relation().cloned() else {
                continue;
            };
            let mut assignments = Vec::new();
            for (master_key, detail_key) in relation.key_pairs() {
                if fields.iter().any(|f| f == master_key) {
                    let value = self.get().value(row, master_key)?.clone();
                    let index = self.registry.get(&child)?.column_index(detail_key)?;
                    assignments.push((index, value));
                }
            }
            if assignments.is_empty() {
                continue;
            }

            let mut detail = self.other(&child)?;
            for detail_row in detail.get().row_ids().to_vec() {
                for (index, value) in &assignments {
                    let (index, value) = (*index, value.clone());
                    let (_, touched) = detail.edit(|e| e.set_column_text(detail_row, index, value))?;
                    detail.after_edit(detail_row, touched, true)?;
                }
            }
        }
        Ok(())
    }

    /// Move the detail rows shown for `row` onto it so another master row
    /// can be shown.
    pub fn park_details(&mut self, row: RowId) -> Result<()> {
        self.get().require_row(row)?;
        for child in self.get().detail_ids().to_vec() {
            let detail = self.registry.get_mut(&child)?;
            let store = std::mem::take(&mut detail.store);
            detail.current = None;
            detail.notify(Event::CollectionChanged {
                action: CollectionAction::Reset,
                row: None,
            });
            self.get_mut()?.row_mut(row)?.details_mut().insert(child, store);
        }
        Ok(())
    }

    /// Bring back detail rows parked on `row`
    pub fn restore_details(&mut self, row: RowId) -> Result<()> {
        for child in self.get().detail_ids().to_vec() {
            let parked = self.get_mut()?.row_mut(row)?.details_mut().remove(&child);
            let Some(store) = parked else {
                continue;
            };
            let detail = self.registry.get_mut(&child)?;
            detail.current = store.live_ids().first().copied();
            detail.store = store;
            detail.notify(Event::CollectionChanged {
                action: CollectionAction::Reset,
                row: None,
            });
        }
        Ok(())
    }

    // ── Validation ─────────────────────────────────────────────────

    /// Validate pending changes before a save. Failures are collected into
    /// the dataset error; with `deep` every detail is validated as well.
    pub fn validate(&mut self, deep: bool) -> Result<bool> {
        self.get_mut()?.clear_error();
        self.remove_empty_rows()?;

        let pending: Vec<RowId> = self
            .get()
            .local_changes()
            .into_iter()
            .filter(|r| r.state() != RowState::Deleted)
            .map(Row::id)
            .collect();

        let mut failed = false;
        let mut result = ValidationResult::default();
        let mut empty = Vec::new();
        for row in pending {
            match self.validate_row(row)? {
                RowCheck::Passed => {}
                RowCheck::Empty => empty.push(row),
                RowCheck::Failed(lines) => {
                    failed = true;
                    lines.into_iter().for_each(|m| result.add(m));
                }
            }
        }
        for message in self.validate_parked_rows()? {
            failed = true;
            result.add(message);
        }

        for row in empty {
            self.delete_row(row, false)?;
        }
        if failed {
            self.get_mut()?.set_error(result.message());
            return Ok(false);
        }

        if deep {
            let require_detail = self.get().require_detail();
            for child in self.get().detail_ids().to_vec() {
                let mut detail = self.other(&child)?;
                if !detail.validate(true)? {
                    return Ok(false);
                }
                let dataset = detail.get();
                let required = dataset
                    .parent_relation()
                    .is_some_and(|r| r.detail_required());
                if (required || require_detail) && dataset.is_empty() {
                    let name = match dataset.definition().obj_name.as_str() {
                        "" => dataset.id().to_string(),
                        name => name.to_string(),
                    };
                    self.get_mut()?
                        .set_error(messages::format(messages::DETAIL_REQUIRED, &[&name]));
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn validate_row(&mut self, row: RowId) -> Result<RowCheck> {
        let dataset = self.get_mut()?;
        let update_hooked = dataset.has_subscribers(EventKind::UpdateValue);
        for index in 0..dataset.columns().len() {
            let field = dataset.columns()[index].field_name().to_string();
            if update_hooked {
                let mut event = Event::UpdateValue {
                    row,
                    column: field.clone(),
                    value: None,
                };
                dataset.emit(&mut event);
                if let Event::UpdateValue {
                    value: Some(value), ..
                } = event
                {
                    dataset.set_column_value(row, &field, value)?;
                }
            }

            let required = validation::check_required(
                dataset.columns()[index].definition(),
                dataset.require_row(row)?.value(index),
            );
            if let Err(error) = required {
                dataset.row_mut(row)?.set_error(&field, &error.message);
            }
        }

        let target = dataset.require_row(row)?;
        if target.is_empty(dataset.columns()) {
            return Ok(RowCheck::Empty);
        }
        if target.has_error() {
            let lines = target.errors().iter().map(|(_, m)| m.to_string()).collect();
            return Ok(RowCheck::Failed(lines));
        }
        if let Err(error) = dataset.check_multi_field(row)? {
            return Ok(RowCheck::Failed(vec![error.message]));
        }

        let data = dataset.require_row(row)?.get_data(dataset.columns());
        let mut event = Event::RowValidate {
            row,
            data,
            cancel: false,
            message: String::new(),
        };
        dataset.emit(&mut event);
        if let Event::RowValidate {
            cancel: true,
            message,
            ..
        } = event
        {
            return Ok(RowCheck::Failed(vec![message]));
        }
        Ok(RowCheck::Passed)
    }

    /// Required and recorded errors of rows parked on master rows
    fn validate_parked_rows(&self) -> Result<Vec<String>> {
        let dataset = self.get();
        let Some(master) = dataset.master_id() else {
            return Ok(Vec::new());
        };
        let columns = dataset.columns();
        let mut problems = Vec::new();
        for master_row in self.registry.all_rows(master)? {
            let Some(parked) = master_row.details().get(&self.id) else {
                continue;
            };
            for row in parked.live().filter(|r| r.state().is_changed()) {
                if row.is_empty(columns) {
                    continue;
                }
                for column in columns {
                    if let Err(error) = validation::check_required(column.definition(), row.value(column.index())) {
                        problems.push(error.message);
                    }
                }
                problems.extend(row.errors().iter().map(|(_, m)| m.to_string()));
            }
        }
        Ok(problems)
    }

    fn remove_empty_rows(&mut self) -> Result<()> {
        let empty: Vec<RowId> = {
            let dataset = self.get();
            dataset
                .rows()
                .filter(|r| r.is_empty(dataset.columns()))
                .map(Row::id)
                .collect()
        };
        for row in empty.into_iter().rev() {
            self.delete_row(row, false)?;
        }

        for child in self.get().detail_ids().to_vec() {
            let columns = self.registry.get(&child)?.columns().to_vec();
            for row in self.get_mut()?.store.rows_mut() {
                if let Some(parked) = row.details_mut().get_mut(&child) {
                    parked.remove_empty(&columns);
                }
            }
        }
        Ok(())
    }

    // ── Requests ───────────────────────────────────────────────────

    fn request_search(&mut self, request: &SearchRequest) -> std::result::Result<Response, TransportError> {
        log::debug!(
            "search from {}: {:?}",
            self.id,
            request.search_data.keys().collect::<Vec<_>>()
        );
        self.registry.transport.search(request)
    }

    fn request_save(&mut self, request: &SaveRequest) -> std::result::Result<Response, TransportError> {
        log::debug!(
            "save from {}: {:?}",
            self.id,
            request.save_data.keys().collect::<Vec<_>>()
        );
        self.registry.transport.save(request)
    }

    /// Add a stored-procedure object's payload to a request
    fn merge_proc(&mut self, proc_id: Option<&str>, data: &mut SchemaPayload) -> Result<Option<String>> {
        let Some(proc_id) = proc_id.filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let mut procedure = self.other(proc_id)?;
        procedure.get_mut()?.bind_proc_params();
        let args = PayloadArgs {
            no_data: true,
            ..Default::default()
        };
        data.extend(procedure.schema_data(&args)?);
        Ok(Some(proc_id.to_string()))
    }

    /// Search from the first page
    pub fn search(&mut self) -> Result<bool> {
        let dataset = self.get_mut()?;
        dataset.set_page_index(0);
        dataset.set_total_rows(0);
        self.run_search()
    }

    pub fn search_page(&mut self, page_index: i64) -> Result<bool> {
        self.get_mut()?.set_page_index(page_index);
        self.run_search()
    }

    fn run_search(&mut self) -> Result<bool> {
        let dataset = self.get_mut()?;
        let mut event = Event::BeforeSearch { cancel: false };
        dataset.emit(&mut event);
        if matches!(event, Event::BeforeSearch { cancel: true }) {
            return Ok(false);
        }
        if dataset.is_stored_proc() {
            dataset.bind_proc_params();
        }
        let procedures = dataset.procedures.clone();

        let mut search_data = self.schema_data(&PayloadArgs::default())?;
        let before_proc = self.merge_proc(procedures.before_search.as_deref(), &mut search_data)?;
        let after_proc = self.merge_proc(procedures.after_search.as_deref(), &mut search_data)?;
        let request = SearchRequest {
            before_proc,
            after_proc,
            search_data,
        };

        let ok = match self.request_search(&request) {
            Ok(response) => {
                let data = response.get(&self.id);
                let dataset = self.get_mut()?;
                dataset.clear();
                if let Some(data) = data {
                    dataset.apply_schema_data(data, true);
                }
                dataset.accept_changes();
                true
            }
            Err(e) => {
                log::warn!("Search of {} failed: {e}", self.id);
                self.get_mut()?.set_error(e.to_string());
                false
            }
        };
        self.get_mut()?.notify(Event::AfterSearch { ok });
        Ok(ok)
    }

    /// Reload this detail for a row of its master. A missing or newly added
    /// master row only clears the detail.
    pub fn search_by_master(&mut self, master_id: &str, master_row: Option<RowId>) -> Result<bool> {
        let dataset = self.get();
        if dataset.master_id() != Some(master_id) {
            return Err(RowsetError::Usage(format!(
                "search_by_master on {}: {}",
                self.id,
                messages::WRONG_MASTER_ROW
            )));
        }
        if dataset.is_stored_proc() {
            return Err(RowsetError::Usage(format!(
                "search_by_master on {}: {}",
                self.id,
                messages::DETAIL_SEARCH_ON_PROC
            )));
        }

        self.get_mut()?.clear();
        let Some(master_row) = master_row else {
            return Ok(true);
        };
        let master = self.registry.get(master_id)?;
        let row = master.require_row(master_row)?;
        if row.state() == RowState::Added {
            return Ok(true);
        }
        let data = row.get_data(master.columns());

        let dataset = self.get_mut()?;
        let mut event = Event::BeforeSearch { cancel: false };
        dataset.emit(&mut event);
        if matches!(event, Event::BeforeSearch { cancel: true }) {
            return Ok(false);
        }
        dataset.set_page_index(0);
        let args = PayloadArgs {
            master_row: Some(data),
            ..Default::default()
        };
        let request = SearchRequest {
            before_proc: None,
            after_proc: None,
            search_data: self.schema_data(&args)?,
        };
        let ok = match self.request_search(&request) {
            Ok(response) => {
                let data = response.get(&self.id);
                let dataset = self.get_mut()?;
                dataset.clear();
                if let Some(data) = data {
                    dataset.apply_schema_data(data, true);
                }
                true
            }
            Err(e) => {
                log::warn!("Detail search of {} failed: {e}", self.id);
                self.get_mut()?.set_error(e.to_string());
                false
            }
        };
        self.get_mut()?.notify(Event::AfterSearch { ok });
        Ok(ok)
    }

    /// Reload every detail for the current row in one request
    pub fn load_details(&mut self) -> Result<bool> {
        let children = self.get().detail_ids().to_vec();
        let master_data = {
            let dataset = self.get();
            dataset
                .current_row()
                .and_then(|r| dataset.row(r))
                .filter(|r| r.state() != RowState::Added)
                .map(|r| r.get_data(dataset.columns()))
        };

        let mut search_data = SchemaPayload::new();
        for child in &children {
            let mut detail = self.other(child)?;
            detail.get_mut()?.clear();
            if let Some(data) = &master_data {
                let args = PayloadArgs {
                    master_row: Some(data.clone()),
                    ..Default::default()
                };
                search_data.extend(detail.schema_data(&args)?);
            }
        }
        if search_data.is_empty() {
            return Ok(true);
        }

        let request = SearchRequest {
            before_proc: None,
            after_proc: None,
            search_data,
        };
        match self.request_search(&request) {
            Ok(response) => {
                for child in &children {
                    if let Some(data) = response.get(child) {
                        let detail = self.registry.get_mut(child)?;
                        detail.clear();
                        detail.apply_schema_data(data, true);
                        detail.accept_changes();
                    }
                }
                Ok(true)
            }
            Err(e) => {
                log::warn!("Loading details of {} failed: {e}", self.id);
                self.get_mut()?.set_error(e.to_string());
                Ok(false)
            }
        }
    }

    /// Re-fetch one row by primary key and reload it in place
    pub fn update_row(&mut self, row: Option<RowId>) -> Result<bool> {
        let dataset = self.get();
        if dataset.is_stored_proc() {
            return Ok(false);
        }
        let Some(row) = row.or(dataset.current_row()) else {
            return Ok(false);
        };
        dataset.require_row(row)?;
        if !dataset.columns().iter().any(|c| c.definition().is_primary_key) {
            log::debug!("{}: no primary key, row refresh skipped", self.id);
            return Ok(false);
        }

        let args = PayloadArgs {
            update_row: Some(row),
            no_data: true,
            ..Default::default()
        };
        let request = SearchRequest {
            before_proc: None,
            after_proc: None,
            search_data: self.schema_data(&args)?,
        };
        let response = match self.request_search(&request) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Refreshing {row} of {} failed: {e}", self.id);
                return Ok(false);
            }
        };

        let record = response
            .get(&self.id)
            .and_then(|data| data.rows.as_ref())
            .filter(|rows| rows.len() == 1)
            .map(|rows| &rows[0]);
        let dataset = self.get_mut()?;
        let found = match record {
            Some(record) => {
                let Dataset { columns, store, .. } = &mut *dataset;
                if let Some(target) = store.get_mut(row) {
                    target.load_data(columns, record);
                }
                true
            }
            None => {
                dataset.set_error(messages::UPDATE_ROW_FAILED);
                false
            }
        };
        dataset.row_mut(row)?.accept_changes();
        if dataset.current_row() == Some(row) {
            dataset.notify(Event::CurrentChanged {
                old: Some(row),
                new: Some(row),
            });
        }
        Ok(found)
    }

    /// The save request payload this dataset would send now
    pub fn save_payload(&mut self, deep: bool) -> Result<SchemaPayload> {
        let only_current = self.get().only_save_current;
        self.schema_data(&PayloadArgs {
            deep,
            only_current,
            ..Default::default()
        })
    }

    /// Validate and send pending changes. Nothing is sent when there is
    /// nothing to save.
    pub fn save(&mut self, deep: bool) -> Result<bool> {
        let mut event = Event::BeforeSave { cancel: false };
        self.get_mut()?.emit(&mut event);
        if matches!(event, Event::BeforeSave { cancel: true }) {
            return Ok(false);
        }
        if !self.validate(deep)? {
            return Ok(false);
        }

        let dataset = self.get_mut()?;
        let is_proc = dataset.is_stored_proc();
        if is_proc {
            dataset.bind_proc_params();
        }
        let procedures = dataset.procedures.clone();
        let save_ext_class = dataset.save_ext_class.clone();

        let mut save_data = self.save_payload(deep)?;
        if !is_proc && save_data.values().all(|p| p.rows.is_empty()) {
            log::debug!("{}: nothing to save", self.id);
            self.get_mut()?.notify(Event::AfterSave { ok: true });
            return Ok(true);
        }
        let before_proc = self.merge_proc(procedures.before_save.as_deref(), &mut save_data)?;
        let after_proc = self.merge_proc(procedures.after_save.as_deref(), &mut save_data)?;
        let request = SaveRequest {
            before_proc,
            after_proc,
            save_data,
            save_ext_class,
        };

        match self.request_save(&request) {
            Ok(response) => {
                if let Some(data) = response.get(&self.id) {
                    self.get_mut()?.apply_schema_data(data, false);
                }
                self.accept_changes(deep)?;
                if self.get().definition().is_save_refresh {
                    self.update_row(None)?;
                }
                self.get_mut()?.notify(Event::AfterSave { ok: true });
                Ok(true)
            }
            Err(e) => {
                log::warn!("Save of {} failed: {e}", self.id);
                let dataset = self.get_mut()?;
                dataset.set_error(e.to_string());
                dataset.notify(Event::AfterSave { ok: false });
                Ok(false)
            }
        }
    }

    // ── Payload assembly ───────────────────────────────────────────

    fn schema_data(&mut self, args: &PayloadArgs) -> Result<SchemaPayload> {
        let query_params = self.query_params(args)?;

        let mut schema = SchemaPayload::new();
        let mut detail_relation = Vec::new();
        if args.deep {
            let detail_args = PayloadArgs {
                deep: true,
                no_data: args.no_data,
                ..Default::default()
            };
            for child in self.get().detail_ids().to_vec() {
                let mut detail = self.other(&child)?;
                if let Some(relation) = detail.get().parent_relation() {
                    detail_relation.push(relation.schema());
                }
                schema.extend(detail.schema_data(&detail_args)?);
            }
        }

        let dataset = self.get();
        let columns = dataset.columns();
        let mut rows = Vec::new();
        if !args.no_data && !dataset.is_stored_proc() {
            if args.only_current {
                if let Some(row) = dataset.current_row().and_then(|r| dataset.row(r)) {
                    rows.push(row.get_data(columns));
                }
            } else {
                rows = self
                    .registry
                    .changes(&self.id)?
                    .into_iter()
                    .filter(|r| {
                        matches!(r.state(), RowState::Added | RowState::Modified | RowState::Deleted)
                    })
                    .map(|r| r.get_data(columns))
                    .collect();
            }
        }
        if args.delete_current {
            let row = dataset
                .current_row()
                .and_then(|r| dataset.row(r))
                .ok_or_else(|| RowsetError::Usage(messages::DELETE_NO_ROW.to_string()))?;
            let mut data = row.get_data(columns);
            data.insert("$state".into(), serde_json::to_value(RowState::Deleted)?);
            rows.push(data);
        }

        let def = dataset.definition();
        schema.insert(
            self.id.clone(),
            ObjectPayload {
                menu_id: def.menu_id.clone(),
                obj_type: def.obj_type,
                page_size: if args.update_row.is_some() { 0 } else { dataset.page_size() },
                page_index: dataset.page_index(),
                total_rows: dataset.total_rows,
                query_params,
                column_params: dataset.column_params(),
                is_master: def.is_master,
                detail_relation,
                rows,
            },
        );
        Ok(schema)
    }

    fn query_params(&mut self, args: &PayloadArgs) -> Result<QueryParams> {
        let master = self.registry.master_context(&self.id)?;
        let dataset = self.get_mut()?;
        let mut params = QueryParams::default();

        if let Some(row) = args.update_row {
            let target = dataset.require_row(row)?;
            params.fix_query = dataset
                .columns()
                .iter()
                .filter(|c| c.definition().is_primary_key)
                .map(|c| (c.field_name().to_string(), target.value(c.index()).to_json()))
                .collect();
        } else {
            let query = &mut dataset.query;
            params.fix_query = query.fix_query.clone();
            params.search_query = query.search_query.clone();
            params.ref_query = query.ref_query.clone();
            params.link_query = query.link_query.clone();
            params.caution_query = query.caution_query.take();
            params.tree_query = query.tree_query.clone();
            params.user_ext_sql_query = query.user_ext_sql_query.clone();
            params.default_query = Some(DefaultQuery {
                func_obj_code: dataset.def.obj_name.clone(),
                menu_id: dataset.def.menu_id.clone(),
            });
            params.order = dataset
                .def
                .default_order
                .clone()
                .filter(|o| !o.trim().is_empty());
            if let (Some(master_row), Some(relation)) = (&args.master_row, &dataset.parent) {
                params.fix_query.extend(relation.params(master_row));
            }

            let mut event = Event::QueryParams { params };
            dataset.emit(&mut event);
            params = match event {
                Event::QueryParams { params } => params,
                _ => QueryParams::default(),
            };
        }

        params.master = master.row_data;
        Ok(params)
    }
}

impl std::fmt::Debug for DatasetMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetMut").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, JsonMap};
    use crate::schema::parse_dictionary_str;
    use crate::transport::MemoryTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    const DICTIONARY: &str = r#"
objects:
  - objId: orders
    objName: Orders
    isMaster: true
    columns:
      - { fieldName: orderId, dataType: number, dataWidth: 10, isPrimaryKey: true }
      - { fieldName: customer, dataType: string, dataWidth: 10, isEmptyRowField: true }
  - objId: lines
    objName: Order lines
    columns:
      - { fieldName: orderId, dataType: number, dataWidth: 10 }
      - { fieldName: sku, dataType: string, dataWidth: 10, isRequired: true, isEmptyRowField: true }
relations:
  - { master: orders, detail: lines, masterKey: orderId, detailKey: orderId }
"#;

    fn rows(value: serde_json::Value) -> Vec<JsonMap> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    fn registry(transport: MemoryTransport) -> Registry {
        let dictionary = parse_dictionary_str(DICTIONARY).unwrap();
        Registry::from_dictionary(&dictionary, transport).unwrap()
    }

    #[test]
    fn test_new_detail_row_takes_master_key() {
        let mut registry = registry(MemoryTransport::new());
        let order = registry.dataset("orders").unwrap().new_row().unwrap();
        let mut orders = registry.dataset("orders").unwrap();
        orders.set_column_text(order, "orderId", "5").unwrap();

        let line = registry.dataset("lines").unwrap().new_row().unwrap();
        let lines = registry.get("lines").unwrap();
        assert_eq!(lines.value(line, "orderId").unwrap(), &Value::from(5i64));
    }

    #[test]
    fn test_master_key_change_propagates() {
        let mut registry = registry(MemoryTransport::new());
        let order = registry.dataset("orders").unwrap().new_row().unwrap();
        registry
            .dataset("orders")
            .unwrap()
            .set_column_text(order, "orderId", "5")
            .unwrap();
        let line = registry.dataset("lines").unwrap().new_row().unwrap();

        registry
            .dataset("orders")
            .unwrap()
            .set_column_text(order, "orderId", "6")
            .unwrap();
        assert_eq!(
            registry.get("lines").unwrap().value(line, "orderId").unwrap(),
            &Value::from(6i64)
        );
    }

    #[test]
    fn test_validate_drops_empty_rows() {
        let mut registry = registry(MemoryTransport::new());
        let mut lines = registry.dataset("lines").unwrap();
        lines.new_row().unwrap();
        let filled = lines.new_row().unwrap();
        lines.set_column_text(filled, "orderId", "1").unwrap();

        assert!(lines.validate(false).unwrap(), "empty rows are dropped, not reported");
        assert_eq!(lines.get().len(), 0, "a row without sku counts as empty");
        assert!(lines.changes().unwrap().is_empty());
    }

    #[test]
    fn test_required_field_fails_validation() {
        let mut registry = registry(MemoryTransport::new());
        let dictionary = parse_dictionary_str(
            r#"
objects:
  - objId: tasks
    columns:
      - { fieldName: title, dataType: string, isRequired: true }
      - { fieldName: note, dataType: string, isEmptyRowField: true }
"#,
        )
        .unwrap();
        registry.add(dictionary.objects[0].clone()).unwrap();
        let mut tasks = registry.dataset("tasks").unwrap();
        let task = tasks.new_row().unwrap();
        tasks.set_column_text(task, "note", "x").unwrap();

        assert!(!tasks.validate(false).unwrap());
        assert_eq!(tasks.get().error(), Some("[title] must not be empty."));
    }

    #[test]
    fn test_park_and_restore_details() {
        let transport = MemoryTransport::new()
            .with_table("orders", rows(json!([{ "orderId": 1 }, { "orderId": 2 }])))
            .with_table("lines", rows(json!([{ "orderId": 1, "sku": "A" }])));
        let mut registry = registry(transport);
        registry.dataset("orders").unwrap().search().unwrap();
        let first = registry.get("orders").unwrap().row_ids()[0];

        registry.dataset("orders").unwrap().load_details().unwrap();
        assert_eq!(registry.get("lines").unwrap().len(), 1);
        let line = registry.get("lines").unwrap().row_ids()[0];
        registry
            .dataset("lines")
            .unwrap()
            .set_column_text(line, "sku", "B")
            .unwrap();

        registry.dataset("orders").unwrap().park_details(first).unwrap();
        assert_eq!(registry.get("lines").unwrap().len(), 0);
        let changes = registry.changes("lines").unwrap();
        assert_eq!(changes.len(), 1, "parked rows still count as changes");

        registry.dataset("orders").unwrap().restore_details(first).unwrap();
        assert_eq!(registry.get("lines").unwrap().len(), 1);
        assert_eq!(registry.get("lines").unwrap().current_row(), Some(line));
    }

    #[test]
    fn test_search_sends_default_query_and_consumes_caution() {
        let transport = MemoryTransport::new().with_table("orders", rows(json!([{ "orderId": 1 }])));
        let remote = transport.clone();
        let mut registry = registry(transport);
        registry.get_mut("orders").unwrap().query_mut().caution_query =
            Some(json!({ "flag": 1 }).as_object().unwrap().clone());

        let mut orders = registry.dataset("orders").unwrap();
        assert!(orders.search().unwrap());
        assert!(orders.search().unwrap());

        let searches = remote.searches();
        let first = &searches[0].search_data["orders"].query_params;
        assert_eq!(first.default_query.as_ref().unwrap().func_obj_code, "Orders");
        assert!(first.caution_query.is_some());
        assert!(searches[1].search_data["orders"].query_params.caution_query.is_none());
    }

    #[test]
    fn test_before_search_can_cancel() {
        let transport = MemoryTransport::new();
        let remote = transport.clone();
        let mut registry = registry(transport);
        registry.get_mut("orders").unwrap().subscribe(
            EventKind::BeforeSearch,
            Box::new(|_, event| {
                if let Event::BeforeSearch { cancel } = event {
                    *cancel = true;
                }
            }),
        );
        assert!(!registry.dataset("orders").unwrap().search().unwrap());
        assert!(remote.searches().is_empty());
    }

    #[test]
    fn test_save_without_changes_sends_nothing() {
        let transport = MemoryTransport::new();
        let remote = transport.clone();
        let mut registry = registry(transport);
        assert!(registry.dataset("orders").unwrap().save(true).unwrap());
        assert!(remote.saves().is_empty());
    }

    #[test]
    fn test_update_row_refreshes_by_primary_key() {
        let transport = MemoryTransport::new()
            .with_table("orders", rows(json!([{ "orderId": 1, "customer": "A" }])));
        let remote = transport.clone();
        let mut registry = registry(transport);
        registry.dataset("orders").unwrap().search().unwrap();

        remote.set_table("orders", rows(json!([{ "orderId": 1, "customer": "B" }])));
        let mut orders = registry.dataset("orders").unwrap();
        assert!(orders.update_row(None).unwrap());
        let row = orders.get().row_ids()[0];
        assert_eq!(orders.get().value(row, "customer").unwrap(), &Value::from("B"));
        assert_eq!(orders.get().require_row(row).unwrap().state(), RowState::Unchanged);

        let last = remote.searches().pop().unwrap();
        let params = &last.search_data["orders"].query_params;
        assert_eq!(params.fix_query["orderId"], json!(1));
        assert_eq!(last.search_data["orders"].page_size, 0);
    }

    #[test]
    fn test_delete_current_sends_deleted_row() {
        let transport = MemoryTransport::new()
            .with_table("orders", rows(json!([{ "orderId": 1 }, { "orderId": 2 }])));
        let remote = transport.clone();
        let mut registry = registry(transport);
        let mut orders = registry.dataset("orders").unwrap();
        orders.search().unwrap();

        assert!(orders.delete_current().unwrap());
        assert_eq!(orders.get().len(), 1);
        assert_eq!(remote.table("orders").len(), 1);
        assert_eq!(remote.table("orders")[0]["orderId"], json!(2));
        assert!(orders.changes().unwrap().is_empty());
    }

    const FORMS: &str = r#"
enums:
  order_status:
    - { code: "N", name: New }
    - { code: "S", name: Shipped }
    - { code: "D", name: Delivered }

objects:
  - objId: tickets
    columns:
      - { fieldName: ticketId, dataType: number, dataWidth: 10, isPrimaryKey: true }
      - { fieldName: status, dataType: string, dataWidth: 1, refType: enum, refObj: order_status, refEditWhere: "N,S", isStrictRef: true }
      - { fieldName: warehouse, dataType: string, dataWidth: 10, refType: table, refObj: warehouses, refField: code, isStrictRef: true, matchChar: "*" }
      - { fieldName: price, dataType: number, dataWidth: 10, dataDec: 2 }
      - { fieldName: note, dataType: string, dataWidth: 20, isRequired: true }
  - objId: invoices
    columns:
      - { fieldName: invoiceId, dataType: number, isPrimaryKey: true }
      - { fieldName: total, dataType: number, dataDec: 2, refType: total, refObj: invoice_lines, refField: amount }
  - objId: invoice_lines
    columns:
      - { fieldName: invoiceId, dataType: number }
      - { fieldName: amount, dataType: number }
relations:
  - { master: invoices, detail: invoice_lines, masterKey: invoiceId, detailKey: invoiceId }
"#;

    fn forms(transport: MemoryTransport) -> Registry {
        let dictionary = parse_dictionary_str(FORMS).unwrap();
        Registry::from_dictionary(&dictionary, transport).unwrap()
    }

    #[test]
    fn test_enum_edit_filter_limits_codes() {
        let mut registry = forms(MemoryTransport::new());
        let mut tickets = registry.dataset("tickets").unwrap();
        let row = tickets.new_row().unwrap();
        assert!(tickets.set_column_text(row, "status", "S").unwrap());

        assert!(!tickets.set_column_text(row, "status", "X").unwrap());
        assert_eq!(tickets.get().value(row, "status").unwrap(), &Value::from("S"));
        assert_eq!(
            tickets.get().column_error(row, "status").unwrap(),
            Some("[X] is not an allowed value for [status]")
        );

        // Delivered exists but is not offered while editing
        assert!(!tickets.set_column_text(row, "status", "D").unwrap());
        assert_eq!(tickets.get().value(row, "status").unwrap(), &Value::from("S"));
        assert_eq!(
            tickets.get().column_error(row, "status").unwrap(),
            Some("[D] is not an allowed value for [status]")
        );

        let codes: Vec<String> = tickets
            .load_reference(row, "status", Value::Null, true, false)
            .unwrap()
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        assert_eq!(codes, vec!["N", "S", "D"]);
    }

    #[test]
    fn test_match_char_skips_the_lookup() {
        let transport = MemoryTransport::new()
            .with_table("warehouses", rows(json!([{ "code": "W1" }])));
        let remote = transport.clone();
        let mut registry = forms(transport);
        let mut tickets = registry.dataset("tickets").unwrap();
        let row = tickets.new_row().unwrap();

        assert!(tickets.set_column_text(row, "warehouse", "*").unwrap());
        assert_eq!(tickets.get().value(row, "warehouse").unwrap(), &Value::from("*"));
        assert!(remote.searches().is_empty());

        assert!(!tickets.set_column_text(row, "warehouse", "W9").unwrap());
        assert_eq!(tickets.get().value(row, "warehouse").unwrap(), &Value::from("*"));
        assert_eq!(
            tickets.get().column_error(row, "warehouse").unwrap(),
            Some("[W9] is not an allowed value for [warehouse]")
        );
        assert_eq!(remote.searches().len(), 1);

        assert!(tickets.set_column_text(row, "warehouse", "W1").unwrap());
        assert_eq!(tickets.get().column_error(row, "warehouse").unwrap(), None);
    }

    #[test]
    fn test_field_changed_error_rolls_back() {
        let mut registry = forms(MemoryTransport::new());
        let mut tickets = registry.dataset("tickets").unwrap();
        let row = tickets.new_row().unwrap();
        assert!(tickets.set_column_text(row, "note", "first").unwrap());

        tickets.get_mut().unwrap().subscribe(
            EventKind::FieldChanged,
            Box::new(|_, event| {
                if let Event::FieldChanged { column, error, .. } = event {
                    if column == "note" {
                        *error = Some("note is locked".into());
                    }
                }
            }),
        );
        assert!(!tickets.set_column_text(row, "note", "second").unwrap());
        assert_eq!(tickets.get().value(row, "note").unwrap(), &Value::from("first"));
        assert_eq!(tickets.get().column_error(row, "note").unwrap(), Some("note is locked"));

        let fresh = tickets.new_row().unwrap();
        assert!(!tickets.set_column_text(fresh, "note", "third").unwrap());
        assert_eq!(tickets.get().value(fresh, "note").unwrap(), &Value::Null);
        assert_eq!(tickets.get().column_error(fresh, "note").unwrap(), Some("note is locked"));
    }

    #[test]
    fn test_precision_hook_widens_decimals() {
        let mut registry = forms(MemoryTransport::new());
        let mut tickets = registry.dataset("tickets").unwrap();
        let row = tickets.new_row().unwrap();
        assert!(!tickets.set_column_text(row, "price", "12.345").unwrap());
        assert_eq!(tickets.get().value(row, "price").unwrap(), &Value::Null);
        assert_eq!(
            tickets.get().column_error(row, "price").unwrap(),
            Some("[price] allows at most 8 integer digits and 2 decimal digits")
        );

        tickets.get_mut().unwrap().subscribe(
            EventKind::Precision,
            Box::new(|_, event| {
                if let Event::Precision { column, precision, .. } = event {
                    if column == "price" {
                        *precision = 3;
                    }
                }
            }),
        );
        assert!(tickets.set_column_text(row, "price", "12.345").unwrap());
        assert_eq!(tickets.get().value(row, "price").unwrap().to_string(), "12.345");
        assert_eq!(tickets.get().column_error(row, "price").unwrap(), None);
    }

    #[test]
    fn test_update_value_fills_before_save() {
        let transport = MemoryTransport::new();
        let remote = transport.clone();
        let mut registry = forms(transport);
        let mut tickets = registry.dataset("tickets").unwrap();
        let row = tickets.new_row().unwrap();
        tickets.set_column_text(row, "ticketId", "7").unwrap();

        assert!(!tickets.save(false).unwrap());
        assert_eq!(
            tickets.get().column_error(row, "note").unwrap(),
            Some("[note] must not be empty.")
        );
        assert!(remote.saves().is_empty());

        tickets.get_mut().unwrap().subscribe(
            EventKind::UpdateValue,
            Box::new(|_, event| {
                if let Event::UpdateValue { column, value, .. } = event {
                    if column == "note" {
                        *value = Some(Value::from("filled"));
                    }
                }
            }),
        );
        assert!(tickets.save(false).unwrap());
        assert_eq!(tickets.get().value(row, "note").unwrap(), &Value::from("filled"));
        assert_eq!(remote.table("tickets")[0]["note"], json!("filled"));
    }

    #[test]
    fn test_total_keeps_large_and_tiny_amounts() {
        let mut registry = forms(MemoryTransport::new());
        let invoice = registry.dataset("invoices").unwrap().new_row().unwrap();
        let mut lines = registry.dataset("invoice_lines").unwrap();
        let first = lines.new_row().unwrap();
        assert!(lines.set_column_text(first, "amount", "0.0000000000000000000000000001").unwrap());
        let second = lines.new_row().unwrap();
        assert!(lines.set_column_text(second, "amount", "123456789012").unwrap());

        let invoices = registry.get("invoices").unwrap();
        assert_eq!(invoices.value(invoice, "total").unwrap().to_string(), "123456789012.00");
        assert_eq!(invoices.column_error(invoice, "total").unwrap(), None);
    }

    #[test]
    fn test_total_overflow_is_recorded_on_the_master() {
        let big = "99999999999999999999999999999999999999";
        let mut registry = forms(MemoryTransport::new());
        let invoice = registry.dataset("invoices").unwrap().new_row().unwrap();
        let mut lines = registry.dataset("invoice_lines").unwrap();
        let first = lines.new_row().unwrap();
        assert!(lines.set_column_text(first, "amount", big).unwrap());
        let second = lines.new_row().unwrap();
        assert!(lines.set_column_text(second, "amount", big).unwrap());

        let invoices = registry.get("invoices").unwrap();
        assert_eq!(invoices.value(invoice, "total").unwrap().to_string(), big);
        assert_eq!(
            invoices.column_error(invoice, "total").unwrap(),
            Some("[total] total is out of range")
        );
        assert!(!registry.dataset("invoices").unwrap().save(true).unwrap());

        registry.dataset("invoice_lines").unwrap().remove_row(second).unwrap();
        assert_eq!(registry.get("invoices").unwrap().column_error(invoice, "total").unwrap(), None);
    }

    #[test]
    fn test_detail_search_raises_search_events() {
        let transport = MemoryTransport::new()
            .with_table("orders", rows(json!([{ "orderId": 1 }])))
            .with_table("lines", rows(json!([{ "orderId": 1, "sku": "A" }])));
        let remote = transport.clone();
        let mut registry = registry(transport);
        registry.dataset("orders").unwrap().search().unwrap();
        let order = registry.get("orders").unwrap().row_ids()[0];

        let seen = Rc::new(RefCell::new(Vec::new()));
        let cancel = Rc::new(RefCell::new(true));
        let lines = registry.get_mut("lines").unwrap();
        let (log, veto) = (seen.clone(), cancel.clone());
        lines.subscribe(
            EventKind::BeforeSearch,
            Box::new(move |_, event| {
                if let Event::BeforeSearch { cancel } = event {
                    log.borrow_mut().push("before".to_string());
                    *cancel = *veto.borrow();
                }
            }),
        );
        let log = seen.clone();
        lines.subscribe(
            EventKind::AfterSearch,
            Box::new(move |_, event| {
                if let Event::AfterSearch { ok } = event {
                    log.borrow_mut().push(format!("after {ok}"));
                }
            }),
        );

        let searches = remote.searches().len();
        let mut lines = registry.dataset("lines").unwrap();
        assert!(!lines.search_by_master("orders", Some(order)).unwrap());
        assert_eq!(remote.searches().len(), searches);
        assert_eq!(*seen.borrow(), vec!["before"]);

        *cancel.borrow_mut() = false;
        assert!(lines.search_by_master("orders", Some(order)).unwrap());
        assert_eq!(lines.get().len(), 1);
        assert_eq!(*seen.borrow(), vec!["before", "before", "after true"]);
    }
}
