//! Operations file loading and conversion into wire user data.
//!
//! The input file is a JSON object whose `operations` key holds a list of
//! records shaped like:
//!
//! ```json
//! { "user_identifiers": [ { "hashed_email": "…" }, { "hashed_phone_number": "…" } ] }
//! ```
//!
//! Unknown keys are ignored at every level. Hashes are passed through
//! untouched; nothing here hashes, trims, or validates them.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::ads::{UploadMode, UserData, UserDataOperation, UserIdentifier};
use crate::error::AppError;

/// Top-level key holding the operation list.
const OPERATIONS_KEY: &str = "operations";

// ─────────────────────────────────────────────────────────────────────────────
// Input Records
// ─────────────────────────────────────────────────────────────────────────────

/// One identifier entry as it appears in the operations file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IdentifierRecord {
    #[serde(default)]
    pub hashed_email: Option<String>,
    #[serde(default)]
    pub hashed_phone_number: Option<String>,
}

/// One operation as it appears in the operations file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OperationRecord {
    #[serde(default)]
    pub user_identifiers: Vec<IdentifierRecord>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Reads and parses an operations file.
///
/// # Errors
///
/// - `AppError::InputFile` - the file cannot be read
/// - `AppError::StructuralInput` - the content is not the expected shape
pub async fn load_operations(path: &Path) -> Result<Vec<OperationRecord>, AppError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::InputFile(format!("{}: {}", path.display(), e)))?;

    let records = parse_operations(&content)?;
    info!("[UPLOAD] Loaded {} operations from file", records.len());
    Ok(records)
}

/// Parses the operations document.
///
/// A missing `operations` key yields an empty list. Each record is decoded
/// separately so a malformed one can be named by index.
pub fn parse_operations(content: &str) -> Result<Vec<OperationRecord>, AppError> {
    let document: Value = serde_json::from_str(content).map_err(|e| AppError::StructuralInput {
        operation: None,
        message: format!("not valid JSON ({})", e),
    })?;

    let Value::Object(mut root) = document else {
        return Err(AppError::StructuralInput {
            operation: None,
            message: "top level must be a JSON object".to_string(),
        });
    };

    let raw = match root.remove(OPERATIONS_KEY) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(AppError::StructuralInput {
                operation: None,
                message: format!("`{}` must be a list", OPERATIONS_KEY),
            })
        }
    };

    raw.into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item).map_err(|e| AppError::StructuralInput {
                operation: Some(index),
                message: e.to_string(),
            })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Building
// ─────────────────────────────────────────────────────────────────────────────

/// Converts one operation record into wire user data.
///
/// Produces one wire identifier per entry, carrying every non-empty hash on
/// that entry. An entry with no hash at all is rejected.
pub fn build_user_data(record: &OperationRecord, index: usize) -> Result<UserData, AppError> {
    let user_identifiers = record
        .user_identifiers
        .iter()
        .enumerate()
        .map(|(position, entry)| {
            let identifier = UserIdentifier {
                hashed_email: non_empty(&entry.hashed_email),
                hashed_phone_number: non_empty(&entry.hashed_phone_number),
            };

            if identifier.hashed_email.is_none() && identifier.hashed_phone_number.is_none() {
                return Err(AppError::StructuralInput {
                    operation: Some(index),
                    message: format!(
                        "user_identifiers[{}] has neither hashed_email nor hashed_phone_number",
                        position
                    ),
                });
            }

            Ok(identifier)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(UserData { user_identifiers })
}

/// Converts every record into a wire operation tagged with `mode`.
///
/// Fails on the first malformed record, before anything is sent.
pub fn build_operations(
    records: &[OperationRecord],
    mode: UploadMode,
) -> Result<Vec<UserDataOperation>, AppError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            build_user_data(record, index).map(|data| UserDataOperation::new(mode, data))
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
