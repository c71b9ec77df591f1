use serde_json::Value;

use crate::error::ApiError;
use crate::pipeline::TeachingRequest;

/// Maximum length of a learner message
const MAX_MESSAGE_LENGTH: usize = 4000;
/// Maximum length of the id fields
const MAX_ID_LENGTH: usize = 128;

/// Validate a raw `/teach` body and turn it into a [`TeachingRequest`].
///
/// Every field must be present, a string, and non-blank. Nothing else is
/// touched on failure, so a rejected request never reaches a collaborator.
pub fn validate_teaching_request(body: &Value) -> Result<TeachingRequest, ApiError> {
    let Some(obj) = body.as_object() else {
        return Err(ApiError::InvalidInput(
            "Request body must be a JSON object".to_string(),
        ));
    };

    let field = |name: &str, max_len: usize| -> Result<String, ApiError> {
        match obj.get(name) {
            None | Some(Value::Null) => {
                Err(ApiError::InvalidInput(format!("Missing required field: {name}")))
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(ApiError::InvalidInput(format!("Field cannot be empty: {name}")))
            }
            Some(Value::String(s)) if s.chars().count() > max_len => Err(ApiError::InvalidInput(
                format!("Field too long: {name} (max {max_len} characters)"),
            )),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(ApiError::InvalidInput(format!(
                "Field must be a string: {name}"
            ))),
        }
    };

    Ok(TeachingRequest {
        user_id: field("userId", MAX_ID_LENGTH)?,
        session_id: field("sessionId", MAX_ID_LENGTH)?,
        lesson_id: field("lessonId", MAX_ID_LENGTH)?,
        user_message: field("userMessage", MAX_MESSAGE_LENGTH)?,
    })
}
