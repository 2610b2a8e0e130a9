//! Newline-delimited JSON protocol spoken by process backends.
//!
//! A backend process writes one JSON object per stdout line. Recognized
//! records are the [`BackendEvent`] union: `meta`, `token`, `progress`,
//! `final` and `error`. Anything else is a fatal protocol violation; the
//! stream does not attempt to resynchronize past a bad line.

use crate::backends::shared::{BackendEvent, RunError, RunResult};

/// Parses one protocol line into a wire event.
///
/// Blank lines must be filtered out by the caller; this function treats
/// every input as a record. The returned error carries an excerpt of the
/// offending line.
///
/// # Errors
/// Returns a `ProtocolViolation` when the line is not valid JSON or not a
/// recognized record type.
pub fn parse_line(line: &str) -> RunResult<BackendEvent> {
    serde_json::from_str::<BackendEvent>(line)
        .map_err(|err| RunError::protocol_for_line(format!("malformed protocol line: {err}"), line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::shared::RunErrorKind;

    const META_LINE: &str = r#"{"type":"meta","model":"gemini-2.5-flash","usage":{"tokens":123}}"#;
    const TOKEN_LINE: &str = r#"{"type":"token","data":"token-0 ","chunk_index":0,"is_final":false}"#;
    const PROGRESS_LINE: &str = r#"{"type":"progress","percent":20}"#;
    const FINAL_LINE: &str = r#"{"type":"final","content":"This is the final content.","metrics":{}}"#;
    const ERROR_LINE: &str = r#"{"type":"error","message":"model exploded"}"#;

    #[test]
    fn test_parses_meta_record() {
        let event = parse_line(META_LINE).unwrap();
        assert!(matches!(
            event,
            BackendEvent::Meta { ref model, usage } if model == "gemini-2.5-flash" && usage.tokens == 123
        ));
    }

    #[test]
    fn test_parses_token_record() {
        let event = parse_line(TOKEN_LINE).unwrap();
        assert_eq!(
            event,
            BackendEvent::Token {
                data: "token-0 ".to_string(),
                chunk_index: 0,
                is_final: false,
            }
        );
    }

    #[test]
    fn test_parses_progress_record() {
        let event = parse_line(PROGRESS_LINE).unwrap();
        assert!(matches!(event, BackendEvent::Progress { percent: 20 }));
    }

    #[test]
    fn test_parses_final_record() {
        let event = parse_line(FINAL_LINE).unwrap();
        assert!(matches!(
            event,
            BackendEvent::Final { ref content, .. } if content == "This is the final content."
        ));
    }

    #[test]
    fn test_parses_error_record() {
        let event = parse_line(ERROR_LINE).unwrap();
        assert!(matches!(
            event,
            BackendEvent::Error { ref message } if message == "model exploded"
        ));
    }

    /// Meta records without usage default to zero tokens.
    #[test]
    fn test_meta_usage_is_optional() {
        let event = parse_line(r#"{"type":"meta","model":"m"}"#).unwrap();
        assert!(matches!(
            event,
            BackendEvent::Meta { usage, .. } if usage.tokens == 0
        ));
    }

    #[test]
    fn test_non_json_line_is_protocol_violation() {
        let err = parse_line("this is not json").unwrap_err();
        assert_eq!(err.kind, RunErrorKind::ProtocolViolation);
        assert!(err.details.unwrap().contains("this is not json"));
    }

    #[test]
    fn test_unknown_record_type_is_protocol_violation() {
        let err = parse_line(r#"{"type":"heartbeat"}"#).unwrap_err();
        assert_eq!(err.kind, RunErrorKind::ProtocolViolation);
        assert!(err.message.contains("malformed protocol line"));
    }

    #[test]
    fn test_wrong_field_type_is_protocol_violation() {
        let err = parse_line(r#"{"type":"token","data":"x","chunk_index":"zero"}"#).unwrap_err();
        assert_eq!(err.kind, RunErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_missing_required_field_is_protocol_violation() {
        let err = parse_line(r#"{"type":"final"}"#).unwrap_err();
        assert_eq!(err.kind, RunErrorKind::ProtocolViolation);
    }

    /// The offending line survives into the error for diagnostics.
    #[test]
    fn test_violation_references_offending_line() {
        let err = parse_line(r#"{"type":"bogus","data":"zzz"}"#).unwrap_err();
        let details = err.details.unwrap();
        assert!(details.contains("bogus"));
        assert!(details.contains("zzz"));
    }
}
