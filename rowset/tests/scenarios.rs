use pretty_assertions::assert_eq;
use rowset::event::{Event, EventKind};
use rowset::{
    parse_dictionary, JsonMap, MemoryTransport, Registry, RowState, RowsetError, Value,
};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

const DICTIONARY: &str = r#"
objects:
  - objId: items
    objName: Items
    columns:
      - { fieldName: code, dataType: string, dataWidth: 10, isPrimaryKey: true, isEmptyRowField: true }
      - { fieldName: amount, dataType: number, dataWidth: 8, dataDec: 2 }
      - { fieldName: note, dataType: string }

  - objId: orders
    objName: Orders
    isMaster: true
    columns:
      - { fieldName: orderId, dataType: number, dataWidth: 10, isPrimaryKey: true, isEmptyRowField: true }
      - { fieldName: customer, dataType: string, dataWidth: 10, refType: table, refObj: customers, refField: code, isStrictRef: true }
      - { fieldName: customerName, dataType: string, dataWidth: 5, refType: prop, refObj: customer, refField: name }
      - { fieldName: totalAmount, dataType: number, dataWidth: 12, dataDec: 2, refType: total, refObj: order_lines, refField: amount }

  - objId: order_lines
    objName: Order lines
    columns:
      - { fieldName: orderId, dataType: number, dataWidth: 10 }
      - { fieldName: code, dataType: string, dataWidth: 10, isEmptyRowField: true }
      - { fieldName: amount, dataType: number, dataWidth: 8, dataDec: 2 }

relations:
  - { master: orders, detail: order_lines, masterKey: orderId, detailKey: orderId }
"#;

fn records(value: serde_json::Value) -> Vec<JsonMap> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_object().unwrap().clone())
        .collect()
}

fn setup(transport: MemoryTransport) -> (TempDir, Registry) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("dictionary.yaml");
    std::fs::write(&path, DICTIONARY).unwrap();
    let dictionary = parse_dictionary(&path).unwrap();
    let registry = Registry::from_dictionary(&dictionary, transport).unwrap();
    (tmp, registry)
}

fn items_transport() -> MemoryTransport {
    MemoryTransport::new().with_table(
        "items",
        records(json!([
            { "code": "A", "amount": 1.5 },
            { "code": "B", "amount": 2 },
            { "code": "C", "amount": 3.25 }
        ])),
    )
    .with_table(
        "customers",
        records(json!([
            { "code": "C01", "name": "Acme" },
            { "code": "C02", "name": "Globex Corporation" }
        ])),
    )
}

#[test]
fn test_search_loads_unchanged_rows() {
    let (_tmp, mut registry) = setup(items_transport());
    let mut items = registry.dataset("items").unwrap();
    assert!(items.search().unwrap());

    let dataset = items.get();
    assert_eq!(dataset.len(), 3);
    assert!(dataset.rows().all(|r| r.state() == RowState::Unchanged));
    assert_eq!(dataset.current_row(), Some(dataset.row_ids()[0]));
    assert_eq!(dataset.total_rows(), 3);
}

#[test]
fn test_width_overflow_blocks_save() {
    let transport = items_transport();
    let remote = transport.clone();
    let (_tmp, mut registry) = setup(transport);
    let mut items = registry.dataset("items").unwrap();
    items.search().unwrap();
    let row = items.get().row_ids()[0];

    assert!(!items.set_column_text(row, "amount", "12.345").unwrap());
    let dataset = items.get();
    assert_eq!(dataset.value(row, "amount").unwrap(), &Value::from(1.5));
    assert_eq!(dataset.require_row(row).unwrap().state(), RowState::Modified);
    let message = dataset.column_error(row, "amount").unwrap().unwrap().to_string();
    assert!(message.contains("amount"), "{message}");

    assert!(!items.save(false).unwrap());
    assert_eq!(items.get().error(), Some(message.as_str()));
    assert!(remote.saves().is_empty());
}

#[test]
fn test_fixing_the_value_clears_the_error() {
    let (_tmp, mut registry) = setup(items_transport());
    let mut items = registry.dataset("items").unwrap();
    items.search().unwrap();
    let row = items.get().row_ids()[0];

    items.set_column_text(row, "amount", "12.345").unwrap();
    assert!(items.set_column_text(row, "amount", "12.34").unwrap());
    assert_eq!(items.get().column_error(row, "amount").unwrap(), None);
    assert!(!items.get().require_row(row).unwrap().has_error());
}

#[test]
fn test_changes_count_added_modified_deleted() {
    let (_tmp, mut registry) = setup(items_transport());
    let mut items = registry.dataset("items").unwrap();
    items.search().unwrap();
    let ids = items.get().row_ids().to_vec();

    items.set_column_text(ids[0], "note", "edited").unwrap();
    items.delete_row(ids[1], false).unwrap();
    for code in ["D", "E"] {
        let row = items.new_row().unwrap();
        items.set_column_text(row, "code", code).unwrap();
    }

    assert_eq!(items.changes().unwrap().len(), 4);
    assert_eq!(items.get().len(), 4);
}

#[test]
fn test_reject_is_idempotent() {
    let (_tmp, mut registry) = setup(items_transport());
    let mut items = registry.dataset("items").unwrap();
    items.search().unwrap();
    let ids = items.get().row_ids().to_vec();
    items.set_column_text(ids[0], "note", "edited").unwrap();
    items.delete_row(ids[2], false).unwrap();
    items.new_row().unwrap();

    for _ in 0..2 {
        items.reject_changes(false).unwrap();
        let dataset = items.get();
        assert_eq!(dataset.row_ids(), ids.as_slice());
        assert!(dataset.rows().all(|r| r.state() == RowState::Unchanged));
        assert_eq!(dataset.value(ids[0], "note").unwrap(), &Value::Null);
        assert!(dataset.deleted_rows().next().is_none());
    }
}

#[test]
fn test_unchanged_edit_is_silent() {
    let (_tmp, mut registry) = setup(items_transport());
    registry.dataset("items").unwrap().search().unwrap();

    let seen = Rc::new(RefCell::new(0));
    let counter = seen.clone();
    registry.get_mut("items").unwrap().subscribe(
        EventKind::ValueChanged,
        Box::new(move |_, _| *counter.borrow_mut() += 1),
    );

    let mut items = registry.dataset("items").unwrap();
    let row = items.get().row_ids()[0];
    assert!(items.set_column_text(row, "code", "A").unwrap());
    assert!(items.set_column_text(row, "note", "").unwrap());
    assert_eq!(*seen.borrow(), 0);
    assert_eq!(items.get().require_row(row).unwrap().state(), RowState::Unchanged);

    items.set_column_text(row, "note", "x").unwrap();
    assert_eq!(*seen.borrow(), 1);
}

#[test]
fn test_delete_added_and_unchanged_rows() {
    let (_tmp, mut registry) = setup(items_transport());
    let mut items = registry.dataset("items").unwrap();
    items.search().unwrap();
    let loaded = items.get().row_ids()[0];
    let added = items.new_row().unwrap();

    assert!(items.delete_row(added, false).unwrap());
    assert!(items.get().deleted_rows().next().is_none());
    assert!(!items.get().row_ids().contains(&added));

    items.set_column_text(loaded, "note", "edited").unwrap();
    assert!(items.delete_row(loaded, false).unwrap());
    let deleted: Vec<_> = items.get().deleted_rows().collect();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].id(), loaded);
    assert_eq!(deleted[0].state(), RowState::Deleted);
    assert_eq!(items.get().value(loaded, "note").unwrap(), &Value::Null, "deleted rows carry origin values");
}

#[test]
fn test_row_deleting_hook_can_cancel() {
    let (_tmp, mut registry) = setup(items_transport());
    registry.dataset("items").unwrap().search().unwrap();
    registry.get_mut("items").unwrap().subscribe(
        EventKind::RowDeleting,
        Box::new(|_, event| {
            if let Event::RowDeleting { cancel, .. } = event {
                *cancel = true;
            }
        }),
    );

    let mut items = registry.dataset("items").unwrap();
    let row = items.get().row_ids()[0];
    assert!(!items.delete_row(row, true).unwrap());
    assert_eq!(items.get().len(), 3);
}

#[test]
fn test_detail_totals_roll_up() {
    let (_tmp, mut registry) = setup(MemoryTransport::new());
    let mut orders = registry.dataset("orders").unwrap();
    let order = orders.new_row().unwrap();
    orders.set_column_text(order, "orderId", "1").unwrap();

    let mut lines = registry.dataset("order_lines").unwrap();
    let mut line_ids = Vec::new();
    for (code, amount) in [("X", "10.50"), ("Y", "5.25")] {
        let line = lines.new_row().unwrap();
        assert_eq!(lines.get().value(line, "orderId").unwrap(), &Value::from(1i64));
        lines.set_column_text(line, "code", code).unwrap();
        assert!(lines.set_column_text(line, "amount", amount).unwrap());
        line_ids.push(line);
    }

    let total = registry.get("orders").unwrap().value(order, "totalAmount").unwrap().to_string();
    assert_eq!(total, "15.75");

    registry.dataset("order_lines").unwrap().remove_row(line_ids[1]).unwrap();
    let total = registry.get("orders").unwrap().value(order, "totalAmount").unwrap().to_string();
    assert_eq!(total, "10.50");
}

#[test]
fn test_total_column_rejects_direct_edit() {
    let (_tmp, mut registry) = setup(MemoryTransport::new());
    let mut orders = registry.dataset("orders").unwrap();
    let order = orders.new_row().unwrap();
    let err = orders.set_column_text(order, "totalAmount", "3").unwrap_err();
    assert!(matches!(err, RowsetError::Usage(_)));
}

#[test]
fn test_alias_error_rolls_back_the_whole_edit() {
    let (_tmp, mut registry) = setup(items_transport());
    let mut orders = registry.dataset("orders").unwrap();
    let order = orders.new_row().unwrap();

    assert!(orders.set_column_text(order, "customer", "C01").unwrap());
    assert_eq!(orders.get().value(order, "customerName").unwrap(), &Value::from("Acme"));

    assert!(!orders.set_column_text(order, "customer", "C02").unwrap());
    let dataset = orders.get();
    assert_eq!(dataset.value(order, "customer").unwrap(), &Value::from("C01"));
    assert_eq!(dataset.value(order, "customerName").unwrap(), &Value::from("Acme"));
    assert!(dataset.column_error(order, "customer").unwrap().is_some());
    assert_eq!(dataset.column_error(order, "customerName").unwrap(), None);
}

#[test]
fn test_strict_reference_rejects_unknown_value() {
    let (_tmp, mut registry) = setup(items_transport());
    let mut orders = registry.dataset("orders").unwrap();
    let order = orders.new_row().unwrap();

    assert!(!orders.set_column_text(order, "customer", "C99").unwrap());
    assert_eq!(orders.get().value(order, "customer").unwrap(), &Value::Null);
    assert!(orders.get().column_error(order, "customer").unwrap().is_some());
}

#[test]
fn test_offline_lookup_is_not_reported_as_unknown_value() {
    let transport = items_transport();
    let remote = transport.clone();
    let (_tmp, mut registry) = setup(transport);
    let mut orders = registry.dataset("orders").unwrap();
    let order = orders.new_row().unwrap();

    remote.set_offline(true);
    assert!(!orders.set_column_text(order, "customer", "C01").unwrap());
    assert_eq!(orders.get().value(order, "customer").unwrap(), &Value::Null);
    assert_eq!(
        orders.get().column_error(order, "customer").unwrap(),
        Some("[customer] could not be checked: Transport unavailable: memory transport is offline")
    );
    let err = orders.load_reference(order, "customer", "C01", false, false).unwrap_err();
    assert!(matches!(err, RowsetError::Transport(_)));

    remote.set_offline(false);
    assert!(orders.set_column_text(order, "customer", "C01").unwrap());
    assert_eq!(orders.get().column_error(order, "customer").unwrap(), None);
    assert_eq!(orders.get().value(order, "customerName").unwrap(), &Value::from("Acme"));
}

#[test]
fn test_number_beyond_decimal_range_is_rejected() {
    let (_tmp, mut registry) = setup(items_transport());
    let mut items = registry.dataset("items").unwrap();
    let item = items.new_row().unwrap();
    assert!(items.set_column_text(item, "amount", "12.5").unwrap());

    let long = "1234567890123456789012345678901234567890";
    assert!(!items.set_column_text(item, "amount", long).unwrap());
    assert_eq!(items.get().value(item, "amount").unwrap().to_string(), "12.5");
    assert_eq!(
        items.get().column_error(item, "amount").unwrap().map(str::to_string),
        Some(format!("[{long}] is out of the numeric range of [amount]"))
    );
}

#[test]
fn test_deep_save_sends_master_and_details() {
    let transport = MemoryTransport::new();
    let remote = transport.clone();
    let (_tmp, mut registry) = setup(transport);

    let mut orders = registry.dataset("orders").unwrap();
    let order = orders.new_row().unwrap();
    orders.set_column_text(order, "orderId", "7").unwrap();
    let mut lines = registry.dataset("order_lines").unwrap();
    for (code, amount) in [("X", "1.25"), ("Y", "2")] {
        let line = lines.new_row().unwrap();
        lines.set_column_text(line, "code", code).unwrap();
        lines.set_column_text(line, "amount", amount).unwrap();
    }
    lines.new_row().unwrap();

    assert!(registry.dataset("orders").unwrap().save(true).unwrap());

    let saves = remote.saves();
    assert_eq!(saves.len(), 1);
    let data = &saves[0].save_data;
    assert_eq!(data["orders"].rows.len(), 1);
    assert_eq!(data["orders"].detail_relation[0].ui_obj_id, "order_lines");
    assert_eq!(data["order_lines"].rows.len(), 2, "the empty line is pruned");
    assert!(data["order_lines"]
        .rows
        .iter()
        .all(|r| r["$state"] == json!("ADDED") && r["orderId"] == json!(7)));

    assert_eq!(remote.table("order_lines").len(), 2);
    assert!(registry.changes("orders").unwrap().is_empty());
    assert!(registry.changes("order_lines").unwrap().is_empty());
}

#[test]
fn test_save_when_offline_reports_failure() {
    let transport = items_transport();
    let remote = transport.clone();
    let (_tmp, mut registry) = setup(transport);
    let mut items = registry.dataset("items").unwrap();
    items.search().unwrap();
    let row = items.get().row_ids()[0];
    items.set_column_text(row, "note", "edited").unwrap();

    let outcome = Rc::new(RefCell::new(None));
    let sink = outcome.clone();
    items.get_mut().unwrap().subscribe(
        EventKind::AfterSave,
        Box::new(move |_, event| {
            if let Event::AfterSave { ok } = event {
                *sink.borrow_mut() = Some(*ok);
            }
        }),
    );

    remote.set_offline(true);
    assert!(!items.save(false).unwrap());
    assert_eq!(*outcome.borrow(), Some(false));
    assert!(items.get().has_error());
    assert_eq!(items.changes().unwrap().len(), 1, "changes survive a failed save");
}

#[test]
fn test_save_applies_modifications() {
    let transport = items_transport();
    let remote = transport.clone();
    let (_tmp, mut registry) = setup(transport);
    let mut items = registry.dataset("items").unwrap();
    items.search().unwrap();
    let ids = items.get().row_ids().to_vec();
    items.set_column_text(ids[1], "note", "edited").unwrap();

    assert!(items.save(false).unwrap());
    assert_eq!(remote.table("items")[1]["note"], json!("edited"));
    assert!(items.changes().unwrap().is_empty());
    assert_eq!(items.get().require_row(ids[1]).unwrap().state(), RowState::Unchanged);
}

#[test]
fn test_search_by_master_checks_the_relation() {
    let transport = MemoryTransport::new()
        .with_table("orders", records(json!([{ "orderId": 1 }, { "orderId": 2 }])))
        .with_table(
            "order_lines",
            records(json!([
                { "orderId": 1, "code": "X", "amount": 1 },
                { "orderId": 2, "code": "Y", "amount": 2 },
                { "orderId": 2, "code": "Z", "amount": 3 }
            ])),
        );
    let (_tmp, mut registry) = setup(transport);
    registry.dataset("orders").unwrap().search().unwrap();
    let second = registry.get("orders").unwrap().row_ids()[1];

    let mut lines = registry.dataset("order_lines").unwrap();
    let err = lines.search_by_master("items", Some(second)).unwrap_err();
    assert!(matches!(err, RowsetError::Usage(_)));

    assert!(lines.search_by_master("orders", Some(second)).unwrap());
    assert_eq!(lines.get().len(), 2);

    assert!(lines.search_by_master("orders", None).unwrap());
    assert_eq!(lines.get().len(), 0);
}

#[test]
fn test_second_master_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("dictionary.yaml");
    let doubled = format!(
        "{DICTIONARY}  - {{ master: items, detail: order_lines, masterKey: code, detailKey: code }}\n"
    );
    std::fs::write(&path, doubled).unwrap();
    let dictionary = parse_dictionary(&path).unwrap();

    let err = Registry::from_dictionary(&dictionary, MemoryTransport::new()).unwrap_err();
    assert!(matches!(err, RowsetError::Usage(_)));
}
