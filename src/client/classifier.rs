//! The classifier contract the pool is written against.

use crate::models::{Annotation, ClassifyError, PromptContext, SamplingParams};
use async_trait::async_trait;

/// One classification call against the completion service.
///
/// Implementations must not keep per-call state: sampling parameters arrive
/// as an argument on every call, so concurrent calls never observe each
/// other's settings.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        prompt: PromptContext<'_>,
        params: SamplingParams,
    ) -> Result<Annotation, ClassifyError>;
}

/// Parse a reply body into an annotation.
///
/// Anything that does not match the schema is an `InvalidResponse`,
/// including a blank label.
pub fn parse_annotation(content: &str) -> Result<Annotation, ClassifyError> {
    let annotation: Annotation = serde_json::from_str(content.trim())
        .map_err(|e| ClassifyError::InvalidResponse(format!("reply does not match schema: {e}")))?;

    if annotation.label.trim().is_empty() {
        return Err(ClassifyError::InvalidResponse("empty label".to_string()));
    }

    Ok(annotation)
}

/// JSON schema sent with every request to constrain the reply.
pub fn annotation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "label": { "type": "string" },
            "reasoning": { "type": "string" },
            "target": { "type": "string" }
        },
        "required": ["label", "reasoning", "target"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_reply() {
        let a = parse_annotation(r#"{"label":"Hate","reasoning":"slur","target":"group"}"#)
            .unwrap();
        assert_eq!(a.label, "Hate");
        assert_eq!(a.target, "group");
    }

    #[test]
    fn test_parse_keeps_optional_score() {
        let a = parse_annotation(r#"{"label":"x","reasoning":"r","target":"t","score":0.8}"#)
            .unwrap();
        assert_eq!(a.score, Some(0.8));
    }

    #[test]
    fn test_parse_missing_field_is_invalid() {
        let err = parse_annotation(r#"{"label":"x","reasoning":"r"}"#).unwrap_err();
        assert_eq!(err.kind(), "invalid_response");
    }

    #[test]
    fn test_parse_wrong_type_is_invalid() {
        let err = parse_annotation(r#"{"label":3,"reasoning":"r","target":"t"}"#).unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_malformed_json_is_invalid() {
        assert!(parse_annotation("label: hate").is_err());
    }

    #[test]
    fn test_parse_blank_label_is_invalid() {
        assert!(parse_annotation(r#"{"label":"  ","reasoning":"r","target":"t"}"#).is_err());
    }
}
