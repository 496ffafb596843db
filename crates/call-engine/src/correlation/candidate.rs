//! External conversation candidates
//!
//! A conversation from the AI voice-agent platform, parsed defensively from
//! whatever JSON shape the platform returned. Missing or oddly typed fields
//! leave the corresponding value empty; parsing never fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// JSON pointers that may hold the caller's phone number
const PHONE_POINTERS: &[&str] = &[
    "/metadata/phone_call/external_number",
    "/metadata/phone_call/caller_id",
    "/metadata/phone_call/from_number",
    "/metadata/phone_call/from",
    "/metadata/caller_id",
    "/metadata/caller_number",
    "/metadata/phone_number",
    "/metadata/from",
    "/conversation_initiation_client_data/dynamic_variables/system__caller_id",
    "/conversation_initiation_client_data/dynamic_variables/caller",
    "/conversation_initiation_client_data/dynamic_variables/caller_number",
];

/// JSON pointers that may hold the telephony session id
const CALL_SID_POINTERS: &[&str] = &[
    "/metadata/phone_call/call_sid",
    "/conversation_initiation_client_data/dynamic_variables/system__call_sid",
];

const START_TIME_POINTERS: &[&str] = &["/metadata/start_time_unix_secs", "/start_time_unix_secs"];

const SUMMARY_POINTERS: &[&str] = &["/analysis/summary", "/analysis/transcript_summary"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptTurn {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalCandidate {
    pub conversation_id: String,
    /// Raw phone values found in the metadata, in any notation
    pub phone_numbers: Vec<String>,
    pub provider_call_sid: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub turns: Vec<TranscriptTurn>,
    /// Summary already produced by the platform
    pub platform_summary: Option<String>,
}

impl ExternalCandidate {
    /// Parse a conversation detail
    ///
    /// `conversation_id` is used when the detail does not carry its own id;
    /// `listed_start` when it carries no usable start time.
    pub fn from_detail(conversation_id: &str, detail: &Value, listed_start: Option<i64>) -> Self {
        let id = detail
            .get("conversation_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(conversation_id)
            .to_string();

        let mut phone_numbers = Vec::new();
        for pointer in PHONE_POINTERS {
            if let Some(value) = detail.pointer(pointer).and_then(as_text) {
                if !phone_numbers.contains(&value) {
                    phone_numbers.push(value);
                }
            }
        }

        let provider_call_sid = CALL_SID_POINTERS.iter().find_map(|p| detail.pointer(p).and_then(as_text));

        let start_time = START_TIME_POINTERS
            .iter()
            .find_map(|p| detail.pointer(p).and_then(as_unix_secs))
            .or(listed_start)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                detail
                    .pointer("/metadata/start_time")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
            });

        let turns = detail
            .get("transcript")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_turn).collect())
            .unwrap_or_default();

        let platform_summary = SUMMARY_POINTERS.iter().find_map(|p| detail.pointer(p).and_then(as_text));

        Self {
            conversation_id: id,
            phone_numbers,
            provider_call_sid,
            start_time,
            turns,
            platform_summary,
        }
    }

    /// Transcript as `Speaker: text` lines, `None` when there is nothing said
    pub fn transcript_text(&self) -> Option<String> {
        if self.turns.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .turns
            .iter()
            .map(|turn| format!("{}: {}", speaker_label(&turn.role), turn.text))
            .collect();
        Some(lines.join("\n"))
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_unix_secs(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_turn(item: &Value) -> Option<TranscriptTurn> {
    let text = ["message", "text", "content"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())?;
    let role = ["role", "speaker"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .unwrap_or("unknown");
    Some(TranscriptTurn {
        role: role.to_string(),
        text: text.to_string(),
    })
}

fn speaker_label(role: &str) -> String {
    match role.to_ascii_lowercase().as_str() {
        "agent" | "assistant" | "ai" => "Agent".to_string(),
        "user" | "caller" | "customer" => "Caller".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => "Unknown".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_detail_is_parsed() {
        let detail = json!({
            "conversation_id": "conv_1",
            "metadata": {
                "start_time_unix_secs": 1717200000,
                "phone_call": {"external_number": "+61412345678", "call_sid": "CA9"}
            },
            "transcript": [
                {"role": "agent", "message": "Hi, how can I help?"},
                {"role": "user", "message": "I need to change my shift."},
                {"role": "agent", "message": null, "tool_calls": []}
            ],
            "analysis": {"transcript_summary": "Caller wants to change a shift."}
        });

        let candidate = ExternalCandidate::from_detail("ignored", &detail, None);
        assert_eq!(candidate.conversation_id, "conv_1");
        assert_eq!(candidate.phone_numbers, vec!["+61412345678"]);
        assert_eq!(candidate.provider_call_sid.as_deref(), Some("CA9"));
        assert_eq!(candidate.start_time.unwrap().timestamp(), 1_717_200_000);
        assert_eq!(candidate.turns.len(), 2);
        assert_eq!(
            candidate.transcript_text().unwrap(),
            "Agent: Hi, how can I help?\nCaller: I need to change my shift."
        );
        assert_eq!(candidate.platform_summary.as_deref(), Some("Caller wants to change a shift."));
    }

    #[test]
    fn test_alternate_field_names() {
        let detail = json!({
            "metadata": {"caller_id": 61412345678u64, "start_time": "2024-06-01T00:00:00Z"},
            "conversation_initiation_client_data": {"dynamic_variables": {"system__caller_id": "0412345678"}},
            "transcript": [{"speaker": "customer", "text": "hello"}]
        });
        let candidate = ExternalCandidate::from_detail("conv_2", &detail, None);
        assert_eq!(candidate.conversation_id, "conv_2");
        assert_eq!(candidate.phone_numbers, vec!["61412345678", "0412345678"]);
        assert_eq!(candidate.start_time.unwrap().to_rfc3339(), "2024-06-01T00:00:00+00:00");
        assert_eq!(candidate.transcript_text().unwrap(), "Caller: hello");
    }

    #[test]
    fn test_malformed_detail_yields_empty_candidate() {
        let candidate = ExternalCandidate::from_detail("conv_3", &json!(["not", "an", "object"]), None);
        assert!(candidate.phone_numbers.is_empty());
        assert!(candidate.start_time.is_none());
        assert!(candidate.transcript_text().is_none());

        let listed = ExternalCandidate::from_detail("conv_4", &json!({"metadata": 5}), Some(1_717_200_000));
        assert_eq!(listed.start_time.unwrap().timestamp(), 1_717_200_000);
    }
}
