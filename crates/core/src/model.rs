//! Model name and response-format validation.
//!
//! The allowed model set is validated in two places (server config and job
//! submission); both go through this module so the list lives in exactly
//! one spot.

use crate::error::CoreError;

/// Model aliases accepted by the Claude CLI `--model` flag.
pub const VALID_MODELS: [&str; 3] = ["haiku", "sonnet", "opus"];

/// Accepted `response_format` values. Empty means "no post-processing".
pub const RESPONSE_FORMAT_TEXT: &str = "text";
pub const RESPONSE_FORMAT_JSON: &str = "json";

/// Whether `model` is one of the supported aliases.
pub fn is_valid_model(model: &str) -> bool {
    VALID_MODELS.contains(&model)
}

/// Validate a model name, returning a client-facing error on failure.
pub fn validate_model(model: &str) -> Result<(), CoreError> {
    if is_valid_model(model) {
        return Ok(());
    }
    Err(CoreError::Validation(format!(
        "model must be one of: {}",
        VALID_MODELS.join(", ")
    )))
}

/// Validate a `response_format` value ("" is allowed and means default).
pub fn validate_response_format(format: &str) -> Result<(), CoreError> {
    match format {
        "" | RESPONSE_FORMAT_TEXT | RESPONSE_FORMAT_JSON => Ok(()),
        _ => Err(CoreError::Validation(
            "response_format must be 'text' or 'json'".to_string(),
        )),
    }
}
