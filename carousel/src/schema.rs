//! Schema types for the carousel round-robin database.
//!
//! A schema is a list of [`Column`]s (each with an aggregation function and
//! optional validity bounds) and a list of [`Archive`]s (each a ring of rows
//! with a fixed sampling step). The schema is fixed at creation time and is
//! read-only on an open handle; changing it means rewriting the file (see
//! [`crate::reshape`]).

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::value::Value;

/// Maximum byte length of a column or archive name as stored on disk.
pub const MAX_NAME_LEN: usize = 16;

/// Aggregation function applied when a new sample lands in a slot that
/// already holds a value for the same timestamp.
///
/// The discriminants are fixed: they are the `function_id` values written to
/// the column table on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    /// Running arithmetic mean of all samples in the step.
    Average,
    /// Greatest sample in the step.
    Maximum,
    /// Smallest sample in the step.
    Minimum,
    /// Sum of all samples in the step.
    Sum,
    /// Number of samples in the step.
    Count,
    /// Most recent sample in the step.
    Last,
}

impl AggFunc {
    /// Returns the on-disk function id.
    pub fn id(self) -> i32 {
        match self {
            Self::Average => 0,
            Self::Maximum => 1,
            Self::Minimum => 2,
            Self::Sum => 3,
            Self::Count => 4,
            Self::Last => 5,
        }
    }

    /// Resolves an on-disk function id.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Average),
            1 => Some(Self::Maximum),
            2 => Some(Self::Minimum),
            3 => Some(Self::Sum),
            4 => Some(Self::Count),
            5 => Some(Self::Last),
            _ => None,
        }
    }

    /// Parses a function token from the columns spec grammar.
    ///
    /// The empty token defaults to [`AggFunc::Average`].
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "" | "average" | "avg" => Some(Self::Average),
            "maximum" | "max" => Some(Self::Maximum),
            "minimum" | "min" => Some(Self::Minimum),
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            "last" => Some(Self::Last),
            _ => None,
        }
    }

    /// Merges the previously stored cell with an incoming sample.
    ///
    /// If `prev` is invalid the result copies the incoming sample with a
    /// counter of 1 (a *count* column stores 1). Otherwise the counter is
    /// incremented (a stored counter of 0 is treated as 1) and the value is
    /// merged per function. The running average
    /// `(prev·counter + incoming) / (counter + 1)` is order-dependent and
    /// biased toward early samples; this is the documented behavior.
    #[allow(clippy::cast_precision_loss)]
    pub fn apply(self, prev: &Value, incoming: &Value) -> Value {
        let mut out = incoming.clone();
        out.counter = 1;
        out.valid = true;
        if !prev.valid {
            if self == Self::Count {
                out.value = 1.0;
            }
            return out;
        }

        let prev_counter = if prev.counter == 0 { 1 } else { prev.counter };
        out.counter = prev_counter + 1;
        match self {
            Self::Average => {
                out.value = (prev.value * prev_counter as f32 + incoming.value)
                    / (prev_counter as f32 + 1.0);
            }
            Self::Sum => out.value = prev.value + incoming.value,
            Self::Minimum => {
                if out.value > prev.value {
                    out.value = prev.value;
                }
            }
            Self::Maximum => {
                if out.value < prev.value {
                    out.value = prev.value;
                }
            }
            Self::Count => out.value = out.counter as f32,
            Self::Last => {}
        }
        out
    }
}

impl std::fmt::Display for AggFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Average => "average",
            Self::Maximum => "maximum",
            Self::Minimum => "minimum",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Last => "last",
        };
        f.write_str(name)
    }
}

/// Definition of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, at most 16 bytes, unique within the schema.
    pub name: String,

    /// Aggregation function. Never changes after creation.
    pub function: AggFunc,

    /// Optional smallest acceptable sample value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f32>,

    /// Optional largest acceptable sample value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f32>,
}

impl Column {
    /// Creates a column without bounds.
    pub fn new(name: impl Into<String>, function: AggFunc) -> Self {
        Self {
            name: name.into(),
            function,
            minimum: None,
            maximum: None,
        }
    }

    /// Returns true when `value` falls within the configured bounds.
    pub fn accepts(&self, value: f32) -> bool {
        if let Some(min) = self.minimum {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.maximum {
            if value > max {
                return false;
            }
        }
        true
    }
}

/// Definition of one archive: a ring of `rows` slots sampled every `step`
/// seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    /// Archive name, at most 16 bytes, unique within the schema.
    pub name: String,

    /// Sampling period in seconds, positive.
    pub step: i64,

    /// Number of slots in the ring, positive.
    pub rows: i32,
}

impl Archive {
    /// Creates an archive definition.
    pub fn new(name: impl Into<String>, step: i64, rows: i32) -> Self {
        Self {
            name: name.into(),
            step,
            rows,
        }
    }

    /// Floors a timestamp to the nearest lower multiple of this archive's
    /// step. Values below 1 pass through unchanged so that empty-row
    /// sentinels survive quantization.
    pub fn quantize(&self, ts: i64) -> i64 {
        if ts < 1 {
            ts
        } else {
            (ts / self.step) * self.step
        }
    }

    /// Lower bound of the retention window, given the latest observed
    /// timestamp.
    pub fn retention_floor(&self, last: i64) -> i64 {
        self.quantize(last - i64::from(self.rows) * self.step)
    }
}

/// Validates a schema: non-empty, unique names within 16 bytes, positive
/// steps and row counts, ordered bounds.
pub fn validate_schema(columns: &[Column], archives: &[Archive]) -> Result<(), SchemaError> {
    if columns.is_empty() {
        return Err(SchemaError::NoColumns);
    }
    if archives.is_empty() {
        return Err(SchemaError::NoArchives);
    }

    for (idx, col) in columns.iter().enumerate() {
        if col.name.len() > MAX_NAME_LEN {
            return Err(SchemaError::NameTooLong(col.name.clone()));
        }
        if columns[..idx].iter().any(|c| c.name == col.name) {
            return Err(SchemaError::DuplicateColumn(col.name.clone()));
        }
        if let (Some(min), Some(max)) = (col.minimum, col.maximum) {
            if min > max {
                return Err(SchemaError::InvertedBounds {
                    name: col.name.clone(),
                    minimum: min,
                    maximum: max,
                });
            }
        }
    }

    for (idx, a) in archives.iter().enumerate() {
        if a.name.len() > MAX_NAME_LEN {
            return Err(SchemaError::NameTooLong(a.name.clone()));
        }
        if archives[..idx].iter().any(|e| e.name == a.name) {
            return Err(SchemaError::DuplicateArchive(a.name.clone()));
        }
        if a.step <= 0 {
            return Err(SchemaError::InvalidStep(a.step));
        }
        if a.rows <= 0 {
            return Err(SchemaError::InvalidRows(i64::from(a.rows)));
        }
    }

    Ok(())
}

/// Truncates a name to [`MAX_NAME_LEN`] bytes on a character boundary.
pub fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name.to_string();
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Parses a comma-separated columns spec.
///
/// Each item is `function[:name[:min[:max]]]`. Function tokens are
/// `average`/`avg`, `sum`, `min`/`minimum`, `max`/`maximum`, `count`, `last`;
/// an empty token means `average`. Missing names default to `c<NN>`, long
/// names are truncated to 16 bytes, bounds must parse as finite floats.
pub fn parse_columns_spec(spec: &str) -> Result<Vec<Column>, SchemaError> {
    let mut columns = Vec::new();
    for (idx, item) in spec.split(',').enumerate() {
        let item = item.trim();
        let mut parts = item.splitn(4, ':');

        let func_token = parts.next().unwrap_or("").trim();
        let function =
            AggFunc::parse(func_token).ok_or_else(|| SchemaError::UnknownFunction(func_token.to_string()))?;

        let name = match parts.next().map(str::trim) {
            Some(n) if !n.is_empty() => truncate_name(n),
            _ => format!("c{idx:02}"),
        };

        let minimum = parts.next().map(parse_bound).transpose()?;
        let maximum = parts.next().map(parse_bound).transpose()?;

        columns.push(Column {
            name,
            function,
            minimum,
            maximum,
        });
    }
    Ok(columns)
}

/// Parses a comma-separated archives spec.
///
/// Each item is `rows:step[:name]`; missing names default to `a<NN>`.
pub fn parse_archives_spec(spec: &str) -> Result<Vec<Archive>, SchemaError> {
    let mut archives = Vec::new();
    for (idx, item) in spec.split(',').enumerate() {
        let item = item.trim();
        let mut parts = item.splitn(3, ':');

        let rows: i32 = parts
            .next()
            .and_then(|t| t.trim().parse().ok())
            .ok_or_else(|| SchemaError::InvalidArchiveSpec(item.to_string()))?;
        let step: i64 = parts
            .next()
            .and_then(|t| t.trim().parse().ok())
            .ok_or_else(|| SchemaError::InvalidArchiveSpec(item.to_string()))?;

        let name = match parts.next().map(str::trim) {
            Some(n) if !n.is_empty() => truncate_name(n),
            _ => format!("a{idx:02}"),
        };

        archives.push(Archive { name, step, rows });
    }
    Ok(archives)
}

fn parse_bound(token: &str) -> Result<f32, SchemaError> {
    let token = token.trim();
    let value: f32 = token
        .parse()
        .map_err(|_| SchemaError::InvalidBound(token.to_string()))?;
    if !value.is_finite() {
        return Err(SchemaError::InvalidBound(token.to_string()));
    }
    Ok(value)
}
