use clap::{Parser, Subcommand, ValueEnum};
use rowset::{parse_dictionary, JsonMap, MemoryTransport, Registry, Value};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;

/// rowset CLI: load a dictionary and a data fixture, then search, edit and
/// validate datasets the way a form would
#[derive(Parser)]
#[command(name = "rowset", version, about)]
struct Cli {
    /// Dictionary file (YAML or JSON)
    #[arg(long, default_value = "dictionary.yaml")]
    dictionary: PathBuf,

    /// JSON fixture: object id -> array of records
    #[arg(long)]
    data: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Show objects, columns and relations of the dictionary
    Describe {
        /// Only this object
        object: Option<String>,
    },

    /// Search an object and print its rows
    Search {
        /// Object id
        object: String,
        /// Rows per page; all rows when omitted
        #[arg(long)]
        page_size: Option<i64>,
        /// Zero-based page index
        #[arg(long, default_value_t = 0)]
        page: i64,
        /// Fixed filters (e.g. --filter status=open)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Edit one row through the edit pipeline and print the outcome
    Edit {
        /// Object id
        object: String,
        /// Zero-based row position; a new row is appended when omitted
        #[arg(long)]
        row: Option<usize>,
        /// Field values (e.g. --field amount=12.5)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Submit the changes afterwards
        #[arg(long)]
        save: bool,
    },

    /// Validate pending changes after applying edits
    Validate {
        /// Object id
        object: String,
        /// Field values applied to a new row first
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Validate details too
        #[arg(long)]
        deep: bool,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let dictionary = parse_dictionary(&cli.dictionary)?;
    let transport = load_fixture(cli.data.as_ref())?;
    let mut registry = Registry::from_dictionary(&dictionary, transport.clone())?;

    match cli.command {
        Command::Describe { object } => {
            let objects: Vec<_> = dictionary
                .objects
                .iter()
                .filter(|o| object.as_deref().map_or(true, |id| o.obj_id == id))
                .map(|o| {
                    json!({
                        "id": o.obj_id,
                        "name": o.obj_name,
                        "type": o.obj_type,
                        "columns": o.columns.iter().map(|c| json!({
                            "field": c.field_name,
                            "type": c.data_type,
                            "width": c.data_width,
                            "dec": c.data_dec,
                            "required": c.is_required,
                            "ref": c.ref_type,
                        })).collect::<Vec<_>>(),
                    })
                })
                .collect();
            if let Some(id) = &object {
                if objects.is_empty() {
                    return Err(format!("Unknown object '{id}'").into());
                }
            }
            print_output(
                &json!({ "objects": objects, "relations": dictionary.relations }),
                &cli.format,
            )?;
        }

        Command::Search {
            object,
            page_size,
            page,
            filters,
        } => {
            let dataset = registry.get_mut(&object)?;
            if let Some(size) = page_size {
                dataset.set_page_size(size);
            }
            for (key, value) in &filters {
                dataset
                    .query_mut()
                    .fix_query
                    .insert(key.clone(), parse_field(value).to_json());
            }

            let mut handle = registry.dataset(&object)?;
            let ok = if page > 0 {
                handle.search_page(page)?
            } else {
                handle.search()?
            };
            let dataset = handle.get();
            print_output(
                &json!({
                    "ok": ok,
                    "error": dataset.error(),
                    "totalRows": dataset.total_rows(),
                    "rows": dataset
                        .rows()
                        .map(|r| values(dataset.columns(), r))
                        .collect::<Vec<_>>(),
                }),
                &cli.format,
            )?;
        }

        Command::Edit {
            object,
            row,
            fields,
            save,
        } => {
            let mut handle = registry.dataset(&object)?;
            handle.search()?;
            let target = match row {
                Some(position) => *handle
                    .get()
                    .row_ids()
                    .get(position)
                    .ok_or_else(|| format!("{object} has no row at position {position}"))?,
                None => handle.new_row()?,
            };

            let mut edits = Vec::new();
            for (field, raw) in &fields {
                let accepted = handle.set_column_text(target, field, parse_field(raw))?;
                let error = handle.get().column_error(target, field)?;
                edits.push(json!({ "field": field, "accepted": accepted, "error": error }));
            }

            let payload = handle.save_payload(false)?;
            let saved = if save { Some(handle.save(false)?) } else { None };
            let dataset = handle.get();
            print_output(
                &json!({
                    "edits": edits,
                    "row": dataset.row(target).map(|r| values(dataset.columns(), r)),
                    "payload": payload,
                    "saved": saved,
                    "error": dataset.error(),
                    "table": save.then(|| transport.table(&object)),
                }),
                &cli.format,
            )?;
        }

        Command::Validate {
            object,
            fields,
            deep,
        } => {
            let mut handle = registry.dataset(&object)?;
            handle.search()?;
            if !fields.is_empty() {
                let target = handle.new_row()?;
                for (field, raw) in &fields {
                    handle.set_column_text(target, field, parse_field(raw))?;
                }
            }
            let ok = handle.validate(deep)?;
            print_output(
                &json!({
                    "ok": ok,
                    "error": handle.get().error(),
                    "changes": handle.changes()?.len(),
                }),
                &cli.format,
            )?;
        }
    }

    Ok(())
}

/// Seed an in-memory transport from a JSON fixture
fn load_fixture(path: Option<&PathBuf>) -> Result<MemoryTransport, Box<dyn std::error::Error>> {
    let transport = MemoryTransport::new();
    let Some(path) = path else {
        return Ok(transport);
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read fixture '{}': {e}", path.display()))?;
    let tables: BTreeMap<String, Vec<JsonMap>> = serde_json::from_str(&content)?;
    log::debug!("Fixture {}: {} tables", path.display(), tables.len());
    for (obj_id, rows) in tables {
        transport.set_table(&obj_id, rows);
    }
    Ok(transport)
}

/// Command-line text as a value: JSON scalars when they parse, text otherwise
fn parse_field(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => {
            Value::from_json(&value)
        }
        _ => Value::from(raw),
    }
}

fn values(columns: &[rowset::Column], row: &rowset::Row) -> serde_json::Value {
    let mut map: JsonMap = columns
        .iter()
        .map(|c| (c.field_name().to_string(), row.value(c.index()).to_json()))
        .collect();
    map.insert("$state".into(), json!(row.state()));
    serde_json::Value::Object(map)
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
