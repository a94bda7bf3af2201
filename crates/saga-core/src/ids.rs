//! Prefixed short IDs for messages and memory records.

use uuid::Uuid;

fn prefixed(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..12])
}

pub fn message_id() -> String {
    prefixed("msg")
}

pub fn topic_id() -> String {
    prefixed("topic")
}

pub fn thread_id() -> String {
    prefixed("thread")
}

pub fn insight_id() -> String {
    prefixed("insight")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_short_hex() {
        let id = message_id();
        assert!(id.starts_with("msg_"));
        assert_eq!(id.len(), "msg_".len() + 12);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(topic_id(), topic_id());
    }
}
