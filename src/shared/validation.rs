//! Validation Utilities

use validator::ValidationErrors;

/// One failed field constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Flatten validation errors into field errors, sorted by field name.
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut flattened: Vec<FieldError> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| FieldError {
                field: field.to_string(),
                message: e
                    .message
                    .clone()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            })
        })
        .collect();
    flattened.sort_by(|a, b| a.field.cmp(&b.field));
    flattened
}

/// First validation failure as a single human-readable line
pub fn validation_message(errors: &ValidationErrors) -> String {
    field_errors(errors)
        .first()
        .map(|e| format!("{}: {}", e.field, e.message))
        .unwrap_or_else(|| "validation failed".into())
}
