//! Pattern-based classification of raw messaging-platform errors.
//!
//! Checks patterns in priority order: rate limit > not modified > not found >
//! can't edit > forbidden > server > network > bad request.
//! Falls back to `Unknown` if no pattern matches.

use crate::delivery::retry::parse_retry_after;
use crate::error::PlatformError;

/// Classify an error message string into a `PlatformError`.
pub fn classify_error_message(msg: &str) -> PlatformError {
    let lower = msg.to_lowercase();

    // Rate limit, with the provider's retry hint when present
    if contains_any(
        &lower,
        &[
            "429",
            "too many requests",
            "flood",
            "rate limit",
            "rate_limit",
            "ratelimited",
            "retry after",
            "retry_after",
        ],
    ) {
        return PlatformError::RateLimited {
            retry_after: parse_retry_after(msg),
            message: msg.to_string(),
        };
    }

    // Not modified before generic bad request (both are 400)
    if contains_any(
        &lower,
        &[
            "message is not modified",
            "not modified",
            "message_not_modified",
        ],
    ) {
        return PlatformError::NotModified(msg.to_string());
    }

    if contains_any(
        &lower,
        &[
            "message to edit not found",
            "message to delete not found",
            "message not found",
            "message_id_invalid",
            "message_not_found",
        ],
    ) {
        return PlatformError::MessageNotFound(msg.to_string());
    }

    if contains_any(
        &lower,
        &[
            "message can't be edited",
            "message can't be deleted",
            "cant_edit",
            "message_edit_time_expired",
        ],
    ) {
        return PlatformError::CantEdit(msg.to_string());
    }

    if contains_any(
        &lower,
        &[
            "403",
            "forbidden",
            "bot was blocked",
            "bot was kicked",
            "not enough rights",
            "chat not found",
        ],
    ) {
        return PlatformError::Forbidden(msg.to_string());
    }

    if contains_any(
        &lower,
        &[
            "500",
            "502",
            "503",
            "504",
            "internal server error",
            "bad gateway",
            "service unavailable",
            "gateway timeout",
        ],
    ) {
        return PlatformError::Server(msg.to_string());
    }

    if contains_any(
        &lower,
        &[
            "timed out",
            "timeout",
            "connection reset",
            "connection refused",
            "broken pipe",
            "dns error",
            "network",
            "econnreset",
        ],
    ) {
        return PlatformError::Network(msg.to_string());
    }

    if contains_any(
        &lower,
        &["400", "bad request", "can't parse entities", "message is too long"],
    ) {
        return PlatformError::BadRequest(msg.to_string());
    }

    PlatformError::Unknown(msg.to_string())
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}
