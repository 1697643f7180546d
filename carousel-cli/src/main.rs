//! Command-line front end for the carousel round-robin database.
//!
//! Exposes the core operations (init, put, get, get-range, info, last,
//! dump, load) and the offline schema mutations. Informational and error
//! output goes to stderr; query results go to stdout. Exit codes: 0 on
//! success, -1 for command errors, -2 for an invalid invocation.

mod timeparse;

use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use carousel::reshape::{self, ColumnChange};
use carousel::{dump, parse_archives_spec, parse_columns_spec, resample, Row, Store, Value};

/// carousel — single-file round-robin time-series database.
#[derive(Parser)]
#[command(name = "carousel", version, about)]
struct Cli {
    /// Path to the database file.
    #[arg(short = 'f', long, global = true)]
    filename: Option<PathBuf>,

    /// Debug verbosity: 0 = info, 1 = debug, 2 = trace (stderr).
    #[arg(short = 'D', long, global = true, default_value_t = 0)]
    debug_level: u8,

    /// Render timestamps human-readable instead of epoch seconds.
    #[arg(long, global = true)]
    format_ts: bool,

    /// strftime pattern used with --format-ts.
    #[arg(long, global = true, default_value = "%Y-%m-%dT%H:%M:%S%z")]
    custom_ts_format: String,

    /// Field separator for tabular output.
    #[arg(long, global = true, default_value = "\t")]
    separator: String,

    /// Resolve range queries against stored data instead of the wall clock.
    #[arg(long, global = true)]
    no_rt: bool,

    /// Print query results as JSON instead of separated columns.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new database file.
    Init {
        /// Columns spec: function[:name[:min[:max]]],... Functions:
        /// average/avg, sum, min/minimum, max/maximum, count, last.
        #[arg(short = 'c', long)]
        columns: String,

        /// Archives spec: rows:step[:name],...
        #[arg(short = 'a', long)]
        archives: String,
    },

    /// Store values (as arguments) at one timestamp.
    Put {
        /// Timestamp (seconds, date, N/now/NOW, or offset like -10m).
        #[arg(long, allow_hyphen_values = true)]
        ts: String,

        /// Destination columns (names or indexes, comma-separated);
        /// defaults to the first len(values) columns.
        #[arg(short = 'c', long)]
        columns: Option<String>,

        /// Values to store, one per column.
        #[arg(allow_hyphen_values = true)]
        values: Vec<String>,
    },

    /// Read the row stored at a timestamp.
    #[command(alias = "g")]
    Get {
        /// Timestamp (seconds, date, N/now/NOW, or offset like -10m).
        #[arg(long, allow_hyphen_values = true)]
        ts: String,

        /// Columns to read (names or indexes, comma-separated).
        #[arg(short = 'c', long)]
        columns: Option<String>,
    },

    /// Read all rows in a time range.
    #[command(alias = "gr")]
    GetRange {
        /// Range start.
        #[arg(short = 'b', long, allow_hyphen_values = true)]
        begin: String,

        /// Range end; unbounded when omitted.
        #[arg(short = 'e', long, allow_hyphen_values = true)]
        end: Option<String>,

        /// Columns to read (names or indexes, comma-separated).
        #[arg(short = 'c', long)]
        columns: Option<String>,

        /// Emit all-invalid rows for gaps in the range.
        #[arg(long)]
        include_invalid: bool,

        /// Average the result down to buckets of this many seconds.
        #[arg(long)]
        average_by: Option<i64>,

        /// Thin the result down to at most this many rows.
        #[arg(long)]
        max_rows: Option<usize>,

        /// Re-check values against column bounds, marking violators invalid.
        #[arg(long)]
        check_bounds: bool,
    },

    /// Print schema and per-archive statistics.
    Info,

    /// Print the last stored timestamp.
    Last,

    /// Dump the database as JSON.
    Dump {
        /// Output file; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Create a database from a JSON dump.
    Load {
        /// Input dump file.
        #[arg(long)]
        input: PathBuf,
    },

    /// Append new columns to the schema.
    AddColumns {
        /// Columns spec: function[:name[:min[:max]]],...
        #[arg(short = 'c', long)]
        columns: String,
    },

    /// Remove columns and their data.
    DelColumns {
        /// Columns to remove (names or indexes, comma-separated).
        #[arg(short = 'c', long)]
        columns: String,
    },

    /// Change a column's name or bounds.
    ChangeColumn {
        /// Column to change (name or index).
        #[arg(short = 'c', long)]
        column: String,

        /// New name (truncated to 16 bytes).
        #[arg(long)]
        name: Option<String>,

        /// New minimum bound.
        #[arg(long, allow_negative_numbers = true)]
        min: Option<f32>,

        /// New maximum bound.
        #[arg(long, allow_negative_numbers = true)]
        max: Option<f32>,

        /// Drop the minimum bound.
        #[arg(long)]
        clear_min: bool,

        /// Drop the maximum bound.
        #[arg(long)]
        clear_max: bool,
    },

    /// Append new, empty archives.
    AddArchives {
        /// Archives spec: rows:step[:name],...
        #[arg(short = 'a', long)]
        archives: String,
    },

    /// Remove archives and their data.
    DelArchives {
        /// Archives to remove (names or indexes, comma-separated).
        #[arg(short = 'a', long)]
        archives: String,
    },

    /// Change the row count of one archive.
    ResizeArchive {
        /// Archive to resize (name or index).
        #[arg(short = 'a', long)]
        archive: String,

        /// New number of rows.
        #[arg(short = 'r', long)]
        rows: i32,
    },
}

/// An error in how the tool was invoked, as opposed to a failed operation.
#[derive(Debug)]
struct UsageError(String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for UsageError {}

fn usage(msg: impl Into<String>) -> Box<dyn Error> {
    Box::new(UsageError(msg.into()))
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.debug_level {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(&cli) {
        error!("{e}");
        let code = if e.is::<UsageError>() { -2 } else { -1 };
        std::process::exit(code);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    match &cli.command {
        Command::Init { columns, archives } => cmd_init(cli, columns, archives),
        Command::Put {
            ts,
            columns,
            values,
        } => cmd_put(cli, ts, columns.as_deref(), values),
        Command::Get { ts, columns } => cmd_get(cli, ts, columns.as_deref()),
        Command::GetRange {
            begin,
            end,
            columns,
            include_invalid,
            average_by,
            max_rows,
            check_bounds,
        } => cmd_get_range(
            cli,
            begin,
            end.as_deref(),
            columns.as_deref(),
            *include_invalid,
            *average_by,
            *max_rows,
            *check_bounds,
        ),
        Command::Info => cmd_info(cli),
        Command::Last => cmd_last(cli),
        Command::Dump { output } => cmd_dump(cli, output.as_deref()),
        Command::Load { input } => cmd_load(cli, input),
        Command::AddColumns { columns } => {
            let columns = parse_columns_spec(columns).map_err(|e| usage(e.to_string()))?;
            reshape::add_columns(filename(cli)?, columns)?;
            Ok(())
        }
        Command::DelColumns { columns } => cmd_del_columns(cli, columns),
        Command::ChangeColumn {
            column,
            name,
            min,
            max,
            clear_min,
            clear_max,
        } => {
            reshape::change_column(
                filename(cli)?,
                column,
                ColumnChange {
                    name: name.clone(),
                    minimum: *min,
                    maximum: *max,
                    clear_minimum: *clear_min,
                    clear_maximum: *clear_max,
                },
            )?;
            Ok(())
        }
        Command::AddArchives { archives } => {
            let archives = parse_archives_spec(archives).map_err(|e| usage(e.to_string()))?;
            reshape::add_archives(filename(cli)?, archives)?;
            Ok(())
        }
        Command::DelArchives { archives } => cmd_del_archives(cli, archives),
        Command::ResizeArchive { archive, rows } => {
            reshape::resize_archive(filename(cli)?, archive, *rows)?;
            Ok(())
        }
    }
}

fn filename(cli: &Cli) -> Result<&PathBuf, Box<dyn Error>> {
    cli.filename
        .as_ref()
        .ok_or_else(|| usage("missing database file name (--filename)"))
}

fn parse_ts(input: &str) -> Result<i64, Box<dyn Error>> {
    timeparse::parse_timestamp(input).map_err(usage)
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn cmd_init(cli: &Cli, columns: &str, archives: &str) -> Result<(), Box<dyn Error>> {
    let columns = parse_columns_spec(columns).map_err(|e| usage(e.to_string()))?;
    let archives = parse_archives_spec(archives).map_err(|e| usage(e.to_string()))?;

    let path = filename(cli)?;
    let store = Store::create(path, columns, archives)?;
    println!(
        "created {} ({} columns, {} archives)",
        path.display(),
        store.columns().len(),
        store.archives().len()
    );
    store.close()?;
    Ok(())
}

fn cmd_put(
    cli: &Cli,
    ts: &str,
    columns: Option<&str>,
    values: &[String],
) -> Result<(), Box<dyn Error>> {
    if values.is_empty() {
        return Err(usage("missing values to put"));
    }
    let ts = parse_ts(ts)?;

    let mut parsed = Vec::with_capacity(values.len());
    for (idx, v) in values.iter().enumerate() {
        let v: f32 = v
            .parse()
            .map_err(|_| usage(format!("invalid value '{v}' at position {}", idx + 1)))?;
        parsed.push(v);
    }

    let store = Store::open(filename(cli)?, false)?;
    let result = (|| {
        let cols = match columns {
            Some(spec) => store.resolve_columns(&split_list(spec))?,
            None => (0..parsed.len()).collect(),
        };
        if cols.len() != parsed.len() {
            return Err(carousel::Error::UnknownColumn(format!(
                "{} columns for {} values",
                cols.len(),
                parsed.len()
            )));
        }
        let samples: Vec<Value> = cols
            .iter()
            .zip(parsed.iter())
            .map(|(&c, &v)| Value::new(ts, c, v))
            .collect();
        store.put_values(&samples)
    })();
    match result {
        Ok(()) => {
            store.close()?;
            Ok(())
        }
        Err(e) => {
            let _ = store.close();
            Err(e.into())
        }
    }
}

fn cmd_get(cli: &Cli, ts: &str, columns: Option<&str>) -> Result<(), Box<dyn Error>> {
    let ts = parse_ts(ts)?;
    let store = Store::open(filename(cli)?, true)?;

    let cols = match columns {
        Some(spec) => store.resolve_columns(&split_list(spec))?,
        None => Vec::new(),
    };
    match store.get(ts, &cols)? {
        Some(row) => print_rows(cli, std::slice::from_ref(&row))?,
        None => eprintln!("no data for {ts}"),
    }
    store.close()?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_get_range(
    cli: &Cli,
    begin: &str,
    end: Option<&str>,
    columns: Option<&str>,
    include_invalid: bool,
    average_by: Option<i64>,
    max_rows: Option<usize>,
    check_bounds: bool,
) -> Result<(), Box<dyn Error>> {
    let lo = parse_ts(begin)?;
    let hi = match end {
        Some(e) => parse_ts(e)?,
        None => -1,
    };

    let store = Store::open(filename(cli)?, true)?;
    let cols = match columns {
        Some(spec) => store.resolve_columns(&split_list(spec))?,
        None => Vec::new(),
    };

    let mut rows = store.get_range(lo, hi, &cols, include_invalid, !cli.no_rt)?;
    if check_bounds {
        rows = resample::mark_out_of_bounds(rows, store.columns());
    }
    if let Some(step) = average_by {
        rows = resample::average_by_time(rows, step);
    }
    if let Some(max) = max_rows {
        rows = resample::average_to_points(rows, max);
    }

    print_rows(cli, &rows)?;
    store.close()?;
    Ok(())
}

fn cmd_info(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let store = Store::open(filename(cli)?, true)?;
    let info = store.info()?;

    println!("Filename: {}", info.path.display());
    println!("Columns: {}", info.columns.len());
    for (idx, col) in info.columns.iter().enumerate() {
        let mut bounds = String::new();
        if let Some(min) = col.minimum {
            bounds.push_str(&format!(" min={min}"));
        }
        if let Some(max) = col.maximum {
            bounds.push_str(&format!(" max={max}"));
        }
        println!("  {idx}: {} ({}{bounds})", col.name, col.function);
    }
    println!("Archives: {}", info.archives.len());
    for (idx, a) in info.archives.iter().enumerate() {
        println!("  {idx}: {}", a.name);
        println!("     rows: {} step: {}s", a.rows, a.step);
        #[allow(clippy::cast_precision_loss)]
        let used_pct = 100.0 * a.used_rows as f32 / a.rows as f32;
        println!("     used rows: {} ({used_pct:.1}%)", a.used_rows);
        if a.used_rows > 0 {
            println!(
                "     TS range: {} - {}",
                format_ts(cli, a.min_ts),
                format_ts(cli, a.max_ts)
            );
            println!("     retention floor: {}", format_ts(cli, a.retention_floor));
        }
        println!("     valid cells: {}", a.valid_cells);
    }

    store.close()?;
    Ok(())
}

fn cmd_last(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let store = Store::open(filename(cli)?, true)?;
    let last = store.last()?;
    if last >= 0 {
        println!("{}", format_ts(cli, last));
    } else {
        println!("{last}");
    }
    store.close()?;
    Ok(())
}

fn cmd_dump(cli: &Cli, output: Option<&std::path::Path>) -> Result<(), Box<dyn Error>> {
    let store = Store::open(filename(cli)?, true)?;
    match output {
        Some(path) => store.dump_to_writer(File::create(path)?)?,
        None => store.dump_to_writer(io::stdout().lock())?,
    }
    store.close()?;
    Ok(())
}

fn cmd_load(cli: &Cli, input: &std::path::Path) -> Result<(), Box<dyn Error>> {
    let store = dump::load_from_reader(File::open(input)?, filename(cli)?)?;
    println!(
        "loaded {} into {}",
        input.display(),
        filename(cli)?.display()
    );
    store.close()?;
    Ok(())
}

fn cmd_del_columns(cli: &Cli, columns: &str) -> Result<(), Box<dyn Error>> {
    let path = filename(cli)?;
    // Resolve names against the current schema, then rewrite.
    let store = Store::open(path, true)?;
    let ids = store.resolve_columns(&split_list(columns))?;
    store.close()?;

    reshape::del_columns(path, &ids)?;
    Ok(())
}

fn cmd_del_archives(cli: &Cli, archives: &str) -> Result<(), Box<dyn Error>> {
    let path = filename(cli)?;
    let store = Store::open(path, true)?;
    let mut ids = Vec::new();
    for name in split_list(archives) {
        ids.push(store.resolve_archive(&name)?);
    }
    store.close()?;

    reshape::del_archives(path, &ids)?;
    Ok(())
}

fn format_ts(cli: &Cli, ts: i64) -> String {
    if cli.format_ts {
        timeparse::format_timestamp(ts, &cli.custom_ts_format)
    } else {
        ts.to_string()
    }
}

fn print_rows(cli: &Cli, rows: &[Row]) -> Result<(), Box<dyn Error>> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    for row in rows {
        let mut line = format_ts(cli, row.ts);
        for v in &row.values {
            line.push_str(&cli.separator);
            if v.valid {
                line.push_str(&v.value.to_string());
            }
        }
        println!("{line}");
    }
    Ok(())
}
