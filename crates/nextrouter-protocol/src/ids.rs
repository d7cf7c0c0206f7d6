use time::OffsetDateTime;

pub const CHAT_ID_PREFIX: &str = "chatcmpl_";

/// Normalize an upstream id into the `chatcmpl_<nanos>` form. Ids that
/// already carry the prefix are kept as-is.
pub fn chat_completion_id(upstream: Option<&str>) -> String {
    match upstream {
        Some(id) if id.starts_with(CHAT_ID_PREFIX) => id.to_string(),
        _ => fresh_chat_completion_id(),
    }
}

pub fn fresh_chat_completion_id() -> String {
    format!(
        "{CHAT_ID_PREFIX}{}",
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    )
}

pub fn unix_timestamp() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_prefixed_ids() {
        assert_eq!(chat_completion_id(Some("chatcmpl_123")), "chatcmpl_123");
    }

    #[test]
    fn replaces_foreign_ids() {
        let id = chat_completion_id(Some("msg_abc"));
        assert!(id.starts_with(CHAT_ID_PREFIX));
        assert!(id[CHAT_ID_PREFIX.len()..].parse::<i128>().is_ok());
    }

    #[test]
    fn replaces_missing_ids() {
        assert!(chat_completion_id(None).starts_with(CHAT_ID_PREFIX));
    }
}
