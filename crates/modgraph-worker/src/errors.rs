use modgraph_core::{TransformError, TransformFailure, TRANSFORM_ERROR_TYPE};
use std::any::Any;

/// Normalize a raw transformer failure into one of the two surfaced shapes.
pub fn format_transform_failure(file_path: &str, failure: TransformFailure) -> TransformError {
    match failure {
        TransformFailure::Syntax {
            message,
            error_type,
            line,
            column,
            code_frame,
        } => {
            let error_type = error_type.unwrap_or_else(|| "SyntaxError".to_string());
            let message = if message.contains(file_path) {
                format!("{}: {}", error_type, message)
            } else {
                format!("{} in {}: {}", error_type, file_path, message)
            };
            TransformError::Syntax {
                file_path: file_path.to_string(),
                message,
                line,
                column,
                code_frame,
                type_tag: TRANSFORM_ERROR_TYPE.to_string(),
            }
        }
        TransformFailure::Other { message, stack } => TransformError::Generic {
            file_path: file_path.to_string(),
            message: format!("{}: {}", file_path, message),
            stack: stack.map(|s| trim_last_frame(&s)),
        },
    }
}

/// Drop the innermost wrapper frame that every worker-side stack ends with.
fn trim_last_frame(stack: &str) -> String {
    let mut lines: Vec<&str> = stack.lines().collect();
    lines.pop();
    lines.join("\n")
}

pub(crate) fn panic_failure(payload: Box<dyn Any + Send>) -> TransformFailure {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    TransformFailure::other(format!("transformer panicked: {}", message))
}
