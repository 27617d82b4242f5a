//! Inbound message lines.
//!
//! `serve` reads one JSON object per line from stdin:
//! `{"group_id": 1001, "user_id": 42, "nickname": "小明", "content": "..."}`.
//! `user_id` may be a number or a string.

use serde::Deserialize;

use murmur_core::types::InboundMessage;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserRef {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct InboundLine {
    group_id: i64,
    user_id: UserRef,
    #[serde(default)]
    nickname: String,
    content: String,
}

/// Parse one stdin line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<InboundMessage>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: InboundLine = serde_json::from_str(line)?;
    let user_ref = match parsed.user_id {
        UserRef::Number(id) => id.to_string(),
        UserRef::Text(text) => text,
    };
    Ok(Some(InboundMessage {
        group_id: parsed.group_id,
        user_ref,
        nickname: parsed.nickname,
        content: parsed.content,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_user_id() {
        let message = parse_line(r#"{"group_id": 1001, "user_id": 42, "nickname": "小明", "content": "你好呀大家"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(message.user_ref, "42");
        assert_eq!(message.user_id(), 42);
        assert_eq!(message.content, "你好呀大家");
    }

    #[test]
    fn test_string_user_id_and_missing_nickname() {
        let message = parse_line(r#"{"group_id": 7, "user_id": "u-9", "content": "hi"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(message.user_ref, "u-9");
        assert_eq!(message.nickname, "");
    }

    #[test]
    fn test_blank_and_malformed_lines() {
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("{not json").is_err());
        assert!(parse_line(r#"{"group_id": 7, "content": "no user"}"#).is_err());
    }
}
