//! dfbridge - generic table requests against a document store
//!
//! The `dfbridge` command issues table and schema requests through the
//! dfbridge adapters. Records live in SurrealDB (`mem://`, `surrealkv://`
//! or a remote `ws://` endpoint).
//!
//! ## Commands
//!
//! - `list` / `describe`: inspect collections
//! - `create-collection` / `update-collection` / `drop-collection` / `truncate`
//! - `get`: retrieve by ids or list with paging
//! - `create` / `replace` / `patch` / `delete`: batched record writes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dfbridge_backend::{BackendKind, Record, SurrealConfig, SurrealConnection};
use dfbridge_core::{
    AdapterError, DescriptorCache, RequestOptions, SchemaAdapter, ServiceConfig, TableAdapter,
};
use serde_json::Value;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "dfbridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generic table requests over non-SQL backends", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Service definition file (JSON); must describe a SurrealDB service
    #[arg(long, global = true, env = "DFBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Database endpoint, overriding DFBRIDGE_SURREAL_URL
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by write commands.
#[derive(Args, Debug, Default)]
struct WriteFlags {
    /// Undo every completed record when one fails
    #[arg(long, conflicts_with = "continue_on_error")]
    rollback: bool,

    /// Keep going after a failed record
    #[arg(long = "continue")]
    continue_on_error: bool,

    /// Return the full records instead of identifiers
    #[arg(long)]
    require_more: bool,

    /// Fields to return (`*` for all)
    #[arg(long)]
    fields: Option<String>,
}

impl WriteFlags {
    fn options(&self) -> RequestOptions {
        let mut opts = RequestOptions::new();
        if let Some(fields) = &self.fields {
            opts = opts.with_fields(fields);
        }
        if self.rollback {
            opts = opts.with_rollback();
        }
        if self.continue_on_error {
            opts = opts.with_continue();
        }
        if self.require_more {
            opts = opts.with_require_more();
        }
        opts
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List collections
    List {
        /// Drop every cached descriptor first
        #[arg(long)]
        refresh: bool,
    },

    /// Describe a collection, or one of its fields
    Describe {
        collection: String,

        #[arg(long)]
        field: Option<String>,
    },

    /// Create a collection
    CreateCollection {
        name: String,

        /// Collection properties (JSON object, or @file)
        #[arg(long)]
        properties: Option<String>,
    },

    /// Merge properties into a collection
    UpdateCollection {
        name: String,

        /// Collection properties (JSON object, or @file)
        #[arg(long)]
        properties: String,
    },

    /// Delete a collection and its records
    DropCollection { name: String },

    /// Delete every record of a collection
    Truncate { collection: String },

    /// Retrieve records by id, or list them
    Get {
        collection: String,

        /// Comma-separated identifiers
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        /// Fields to return (`*` for all)
        #[arg(long)]
        fields: Option<String>,

        #[arg(long)]
        limit: Option<u64>,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Sort expression, e.g. `name DESC`
        #[arg(long)]
        order: Option<String>,

        /// Include the total count in the response
        #[arg(long)]
        include_count: bool,
    },

    /// Create records
    Create {
        collection: String,

        /// Record or array of records (JSON, or @file)
        #[arg(long)]
        data: String,

        #[command(flatten)]
        flags: WriteFlags,
    },

    /// Replace records; each record carries its identifier
    Replace {
        collection: String,

        /// Record or array of records (JSON, or @file)
        #[arg(long)]
        data: String,

        #[command(flatten)]
        flags: WriteFlags,
    },

    /// Merge fields into records
    Patch {
        collection: String,

        /// Record or array of records (JSON, or @file)
        #[arg(long)]
        data: String,

        /// Apply the single record in --data to each of these identifiers
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        #[command(flatten)]
        flags: WriteFlags,
    },

    /// Delete records by identifier
    Delete {
        collection: String,

        /// Comma-separated identifiers
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        flags: WriteFlags,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dfbridge_core::init_tracing(cli.json, level);

    let config = surreal_config(cli.config.as_deref(), cli.url.as_deref())?;
    let conn = SurrealConnection::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.url))?;
    let conn = Arc::new(conn);
    let cache = Arc::new(DescriptorCache::new());
    let table = TableAdapter::with_cache(conn.clone(), cache.clone());
    let schema = SchemaAdapter::with_cache(conn, cache);

    match cli.command {
        Commands::List { refresh } => {
            let names = schema.list_collections(refresh).await?;
            print_json(&names)
        }
        Commands::Describe { collection, field } => match field {
            Some(field) => print_json(&schema.describe_field(&collection, &field).await?),
            None => print_json(&schema.describe_collection(&collection).await?),
        },
        Commands::CreateCollection { name, properties } => {
            let properties = match properties {
                Some(raw) => parse_object(&raw)?,
                None => Record::new(),
            };
            print_json(&schema.create_collection(&name, &properties).await?)
        }
        Commands::UpdateCollection { name, properties } => {
            let properties = parse_object(&properties)?;
            print_json(&schema.update_collection(&name, &properties).await?)
        }
        Commands::DropCollection { name } => print_json(&schema.delete_collection(&name).await?),
        Commands::Truncate { collection } => print_json(&table.truncate(&collection).await?),
        Commands::Get {
            collection,
            ids,
            fields,
            limit,
            offset,
            order,
            include_count,
        } => {
            let mut opts = RequestOptions::new().with_offset(offset);
            if let Some(fields) = &fields {
                opts = opts.with_fields(fields);
            }
            if let Some(limit) = limit {
                opts = opts.with_limit(limit);
            }
            if let Some(order) = order {
                opts = opts.with_order(order);
            }
            if include_count {
                opts = opts.with_include_count();
            }
            let response = if ids.is_empty() {
                table.retrieve_by_filter(&collection, None, &opts).await
            } else {
                table
                    .retrieve_by_ids(&collection, id_values(ids), &opts)
                    .await
            };
            print_json(&report(response)?)
        }
        Commands::Create {
            collection,
            data,
            flags,
        } => {
            let records = parse_records(&data)?;
            let response = table.create(&collection, records, &flags.options()).await;
            print_json(&report(response)?)
        }
        Commands::Replace {
            collection,
            data,
            flags,
        } => {
            let records = parse_records(&data)?;
            let response = table.replace(&collection, records, &flags.options()).await;
            print_json(&report(response)?)
        }
        Commands::Patch {
            collection,
            data,
            ids,
            flags,
        } => {
            let mut records = parse_records(&data)?;
            let response = if ids.is_empty() {
                table.patch(&collection, records, &flags.options()).await
            } else {
                if records.len() != 1 {
                    bail!("--ids expects exactly one record in --data");
                }
                let updates = records.remove(0);
                table
                    .patch_by_ids(&collection, id_values(ids), &updates, &flags.options())
                    .await
            };
            print_json(&report(response)?)
        }
        Commands::Delete {
            collection,
            ids,
            flags,
        } => {
            let response = table
                .delete_by_ids(&collection, id_values(ids), &flags.options())
                .await;
            print_json(&report(response)?)
        }
    }
}

/// Database settings: the service file when given, else the environment.
fn surreal_config(config: Option<&Path>, url: Option<&str>) -> Result<SurrealConfig> {
    let mut surreal = match config {
        Some(path) => {
            let service = ServiceConfig::from_file(path)
                .with_context(|| format!("Failed to load service config {}", path.display()))?;
            if service.kind != BackendKind::SurrealDb {
                bail!(
                    "service '{}' is a {} service; only SurrealDB services can be opened here",
                    service.name,
                    service.kind.label()
                );
            }
            service.surreal_config()
        }
        None => SurrealConfig::from_env(),
    };
    if let Some(url) = url {
        surreal = surreal.with_url(url);
    }
    debug!(url = %surreal.url, namespace = %surreal.namespace, "database settings");
    Ok(surreal)
}

/// Print per-record outcomes of a failed batch before returning the error.
fn report<T>(result: Result<T, AdapterError>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(AdapterError::Batch {
            message,
            outcomes,
            rolled_back,
        }) => {
            for (index, outcome) in outcomes.iter().enumerate() {
                match outcome {
                    Ok(record) => eprintln!("  [{index}] ok {}", Value::Object(record.clone())),
                    Err(err) => eprintln!("  [{index}] failed: {err}"),
                }
            }
            if rolled_back {
                eprintln!("  all changes rolled back");
            }
            bail!("Batch Error: {message}")
        }
        Err(err) => Err(err.into()),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn id_values(ids: Vec<String>) -> Vec<Value> {
    ids.into_iter()
        .map(|id| Value::String(id.trim().to_string()))
        .collect()
}

/// Inline JSON, or the contents of a file when prefixed with `@`.
fn read_json(raw: &str) -> Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("Invalid JSON")
}

fn parse_object(raw: &str) -> Result<Record> {
    match read_json(raw)? {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object, got {other}"),
    }
}

/// A record, an array of records, or a `{"resource": [...]}` envelope.
fn parse_records(raw: &str) -> Result<Vec<Record>> {
    let value = match read_json(raw)? {
        Value::Object(mut map) if map.contains_key("resource") => {
            map.remove("resource").unwrap_or(Value::Null)
        }
        other => other,
    };
    match value {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => bail!("record {i} is not a JSON object: {other}"),
            })
            .collect(),
        other => bail!("expected a record or an array of records, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_single_and_many_records() {
        assert_eq!(parse_records(r#"{"name": "a"}"#).unwrap().len(), 1);
        assert_eq!(parse_records(r#"[{"a": 1}, {"b": 2}]"#).unwrap().len(), 2);
        assert_eq!(
            parse_records(r#"{"resource": [{"a": 1}, {"b": 2}, {"c": 3}]}"#)
                .unwrap()
                .len(),
            3
        );
        assert!(parse_records("[1, 2]").is_err());
        assert!(parse_records("not json").is_err());
    }

    #[test]
    fn reads_records_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "from-file"}}]"#).unwrap();
        let arg = format!("@{}", file.path().display());
        let records = parse_records(&arg).unwrap();
        assert_eq!(records[0]["name"], Value::String("from-file".to_string()));
    }

    #[test]
    fn non_surreal_service_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name": "couch", "type": "couchdb", "config": {{"dsn": "http://localhost:5984/db"}}}}"#
        )
        .unwrap();
        let err = surreal_config(Some(file.path()), None).unwrap_err();
        assert!(err.to_string().contains("CouchDB"));
    }

    #[test]
    fn url_flag_overrides_service_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name": "docs", "type": "surrealdb", "config": {{"url": "mem://"}}}}"#
        )
        .unwrap();
        let cfg = surreal_config(Some(file.path()), Some("surrealkv:///tmp/dfb")).unwrap();
        assert_eq!(cfg.url, "surrealkv:///tmp/dfb");
    }

    #[test]
    fn write_flags_map_to_options() {
        let flags = WriteFlags {
            rollback: true,
            require_more: true,
            fields: Some("name".to_string()),
            ..WriteFlags::default()
        };
        let opts = flags.options();
        assert!(opts.rollback);
        assert!(!opts.continue_on_error);
        assert!(opts.require_more);
        assert_eq!(opts.fields.names(), ["name".to_string()]);
    }
}
