//! Tolerant parser for the backup preferences property list.
//!
//! The document shape is checked strictly: the root must be a dictionary
//! holding a `Destinations` array of dictionaries, otherwise the whole parse
//! fails with [`ParseError::Format`]. Inside each destination every field is
//! best-effort: a missing or mistyped value is replaced by its zero value
//! and logged, and never aborts the destination or the parse.

use std::collections::{BTreeSet, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};

use crate::access::{AccessProvider, AccessScope};
use crate::error::{format_err, ParseError};
use crate::types::{BackupResult, Destination, DestinationId, Snapshot};

pub const KEY_DESTINATIONS: &str = "Destinations";
pub const KEY_LAST_DESTINATION_ID: &str = "LastDestinationID";
pub const KEY_DESTINATION_ID: &str = "DestinationID";
pub const KEY_ENCRYPTION_STATE: &str = "LastKnownEncryptionState";
pub const KEY_NETWORK_URL: &str = "NetworkURL";
pub const KEY_BYTES_AVAILABLE: &str = "BytesAvailable";
pub const KEY_BYTES_USED: &str = "BytesUsed";
pub const KEY_VOLUME_NAME: &str = "LastKnownVolumeName";
pub const KEY_SNAPSHOT_DATES: &str = "SnapshotDates";
pub const KEY_ATTEMPT_DATES: &str = "AttemptDates";
pub const KEY_RESULT: &str = "RESULT";

const ENCRYPTED: &str = "Encrypted";

/// A single malformed field, recovered locally by default substitution.
#[derive(Debug)]
enum FieldError {
    Missing { field: &'static str },
    WrongType { field: &'static str, expected: &'static str },
}

/// Parse the preferences file at `path`.
///
/// Read access is acquired through `provider` for the duration of the call
/// and released on every exit path.
pub fn parse(path: &Path, provider: &dyn AccessProvider) -> Result<Snapshot, ParseError> {
    let _scope = AccessScope::acquire(provider, path)?;

    let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let snapshot = parse_bytes(path, &bytes)?;
    tracing::debug!(
        path = %path.display(),
        destinations = snapshot.destinations.len(),
        "parsed preferences file",
    );
    Ok(snapshot)
}

/// Decode an in-memory property list. `path` is only used in errors.
pub fn parse_bytes(path: &Path, bytes: &[u8]) -> Result<Snapshot, ParseError> {
    let value = Value::from_reader(Cursor::new(bytes))
        .map_err(|e| format_err(path, format!("not a property list: {e}")))?;
    let Some(root) = value.as_dictionary() else {
        return Err(format_err(path, "top level is not a dictionary"));
    };
    parse_document(path, root)
}

fn parse_document(path: &Path, root: &Dictionary) -> Result<Snapshot, ParseError> {
    let Some(raw) = root.get(KEY_DESTINATIONS) else {
        return Err(format_err(path, format!("missing `{KEY_DESTINATIONS}` array")));
    };
    let Some(entries) = raw.as_array() else {
        return Err(format_err(path, format!("`{KEY_DESTINATIONS}` is not an array")));
    };

    let mut dictionaries = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let Some(dict) = entry.as_dictionary() else {
            return Err(format_err(
                path,
                format!("`{KEY_DESTINATIONS}[{index}]` is not a dictionary"),
            ));
        };
        dictionaries.push(dict);
    }

    let mut seen = HashSet::new();
    let mut destinations = Vec::with_capacity(dictionaries.len());
    for (index, dict) in dictionaries.into_iter().enumerate() {
        let own_id = source_id(index, dict);
        let has_source_id = own_id.is_some();
        let destination = parse_destination(index, dict, own_id);
        // Only ids read from the document can collide; positional ones are unique.
        if has_source_id && !seen.insert(destination.id.clone()) {
            tracing::warn!(
                index,
                id = %destination.id,
                "dropping destination with duplicate id",
            );
            continue;
        }
        destinations.push(destination);
    }

    let last_destination_id = root
        .get(KEY_LAST_DESTINATION_ID)
        .and_then(Value::as_string)
        .and_then(|wanted| {
            destinations
                .iter()
                .find(|d| d.id.0 == wanted)
                .map(|d| d.id.clone())
        });

    Ok(Snapshot {
        destinations,
        last_destination_id,
    })
}

/// The entry's own id, if it has a usable one.
fn source_id(index: usize, dict: &Dictionary) -> Option<String> {
    match string_field(dict, KEY_DESTINATION_ID) {
        Ok(id) if !id.is_empty() => Some(id),
        Ok(_) => None,
        Err(err) => {
            log_field_error(index, &err);
            None
        }
    }
}

/// Id for an entry without a usable `DestinationID`: its position in the
/// source array.
fn positional_id(index: usize) -> String {
    format!("#{index}")
}

fn parse_destination(index: usize, dict: &Dictionary, source_id: Option<String>) -> Destination {
    let id = source_id.unwrap_or_else(|| positional_id(index));
    let encryption = recover(index, string_field(dict, KEY_ENCRYPTION_STATE));
    let last_result = match signed_field(dict, KEY_RESULT) {
        Ok(code) => Some(BackupResult::from_code(code)),
        Err(err) => {
            log_field_error(index, &err);
            None
        }
    };

    Destination {
        id: DestinationId::from(id),
        is_encrypted: encryption == ENCRYPTED,
        is_network: dict.contains_key(KEY_NETWORK_URL),
        bytes_available: recover(index, byte_count_field(dict, KEY_BYTES_AVAILABLE)),
        bytes_used: recover(index, byte_count_field(dict, KEY_BYTES_USED)),
        volume_name: recover(index, string_field(dict, KEY_VOLUME_NAME)),
        snapshots: recover(index, date_set_field(dict, KEY_SNAPSHOT_DATES)),
        attempts: recover(index, date_set_field(dict, KEY_ATTEMPT_DATES)),
        last_result,
    }
}

fn recover<T: Default>(index: usize, result: Result<T, FieldError>) -> T {
    result.unwrap_or_else(|err| {
        log_field_error(index, &err);
        T::default()
    })
}

fn log_field_error(index: usize, err: &FieldError) {
    match err {
        FieldError::Missing { field } => {
            tracing::trace!(index, field, "destination field missing, using default");
        }
        FieldError::WrongType { field, expected } => {
            tracing::debug!(
                index,
                field,
                expected,
                "destination field malformed, using default",
            );
        }
    }
}

fn field<'a>(dict: &'a Dictionary, key: &'static str) -> Result<&'a Value, FieldError> {
    dict.get(key).ok_or(FieldError::Missing { field: key })
}

fn string_field(dict: &Dictionary, key: &'static str) -> Result<String, FieldError> {
    field(dict, key)?
        .as_string()
        .map(str::to_owned)
        .ok_or(FieldError::WrongType {
            field: key,
            expected: "string",
        })
}

fn signed_field(dict: &Dictionary, key: &'static str) -> Result<i64, FieldError> {
    field(dict, key)?
        .as_signed_integer()
        .ok_or(FieldError::WrongType {
            field: key,
            expected: "integer",
        })
}

fn byte_count_field(dict: &Dictionary, key: &'static str) -> Result<i64, FieldError> {
    let value = signed_field(dict, key)?;
    if value < 0 {
        return Err(FieldError::WrongType {
            field: key,
            expected: "non-negative integer",
        });
    }
    Ok(value)
}

// Any non-date element invalidates the whole set.
fn date_set_field(
    dict: &Dictionary,
    key: &'static str,
) -> Result<BTreeSet<DateTime<Utc>>, FieldError> {
    let wrong_type = FieldError::WrongType {
        field: key,
        expected: "array of dates",
    };
    let Some(items) = field(dict, key)?.as_array() else {
        return Err(wrong_type);
    };
    items
        .iter()
        .map(|item| {
            item.as_date()
                .map(|date| DateTime::<Utc>::from(SystemTime::from(date)))
        })
        .collect::<Option<BTreeSet<_>>>()
        .ok_or(wrong_type)
}
