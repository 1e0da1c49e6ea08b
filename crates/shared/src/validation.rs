//! Boundary checks shared by the server and the client.
//!
//! Every check returns an [`ApiError`] with [`ErrorCode::Validation`] so the
//! caller can report it to the originating connection without persisting.

use crate::{
    domain::{RoomId, UserId, ANONYMOUS_AUTHOR, MAX_DISPLAY_NAME_CHARS, MAX_MESSAGE_CHARS},
    error::ApiError,
};

pub fn validate_room_id(raw: &str) -> Result<RoomId, ApiError> {
    RoomId::parse(raw).ok_or_else(|| ApiError::validation("Invalid room ID"))
}

pub fn validate_user_id(raw: i64) -> Result<UserId, ApiError> {
    if raw <= 0 {
        return Err(ApiError::validation("Invalid user ID"));
    }
    Ok(UserId(raw))
}

/// Length is checked on the raw text; the stored body is the trimmed text.
pub fn validate_message_text(raw: &str) -> Result<String, ApiError> {
    if raw.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::validation(format!(
            "Message text cannot exceed {MAX_MESSAGE_CHARS} characters"
        )));
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("Message text is required"));
    }
    Ok(trimmed.to_string())
}

pub fn sanitize_display_name(raw: Option<&str>) -> String {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return ANONYMOUS_AUTHOR.to_string();
    }
    trimmed.chars().take(MAX_DISPLAY_NAME_CHARS).collect()
}

pub fn validate_heart(sender: i64, receiver: i64) -> Result<(UserId, UserId), ApiError> {
    let sender = validate_user_id(sender)?;
    let receiver = validate_user_id(receiver)?;
    if sender == receiver {
        return Err(ApiError::validation("Cannot send heart to yourself"));
    }
    Ok((sender, receiver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn message_text_boundary_is_500_chars() {
        let ok = "a".repeat(MAX_MESSAGE_CHARS);
        assert_eq!(validate_message_text(&ok).expect("500 chars"), ok);

        let err = validate_message_text(&"a".repeat(MAX_MESSAGE_CHARS + 1))
            .expect_err("501 chars");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn message_text_counts_characters_not_bytes() {
        let hearts = "\u{2764}".repeat(MAX_MESSAGE_CHARS);
        assert!(validate_message_text(&hearts).is_ok());
    }

    #[test]
    fn blank_text_is_rejected_and_text_is_trimmed() {
        assert!(validate_message_text("   ").is_err());
        assert_eq!(validate_message_text("  hi \n").expect("trim"), "hi");
    }

    #[test]
    fn user_ids_must_be_positive() {
        assert!(validate_user_id(0).is_err());
        assert!(validate_user_id(-4).is_err());
        assert_eq!(validate_user_id(4).expect("valid"), UserId(4));
    }

    #[test]
    fn display_name_defaults_and_truncates() {
        assert_eq!(sanitize_display_name(None), ANONYMOUS_AUTHOR);
        assert_eq!(sanitize_display_name(Some("   ")), ANONYMOUS_AUTHOR);
        let long = "x".repeat(45);
        assert_eq!(sanitize_display_name(Some(&long)).len(), MAX_DISPLAY_NAME_CHARS);
    }

    #[test]
    fn self_hearts_are_rejected() {
        let err = validate_heart(1, 1).expect_err("self heart");
        assert_eq!(err.message, "Cannot send heart to yourself");
        assert!(validate_heart(1, 2).is_ok());
    }
}
