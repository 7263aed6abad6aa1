use std::sync::Arc;

use uuid::Uuid;

/// Length of generated rule UIDs.
pub const SHORT_UID_LENGTH: usize = 14;

/// Source of candidate UIDs for new rules. Injectable so tests can force collisions.
pub type UidGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Random lowercase UID, always starting with a letter.
pub fn generate_short_uid() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    let mut uid = String::with_capacity(SHORT_UID_LENGTH);
    // map the first nibble onto a..p so the UID never looks numeric
    let first = hex.as_bytes()[0];
    let nibble = (first as char).to_digit(16).unwrap_or(0) as u8;
    uid.push((b'a' + nibble) as char);
    uid.push_str(&hex[1..SHORT_UID_LENGTH]);
    uid
}

pub fn default_generator() -> UidGenerator {
    Arc::new(generate_short_uid)
}

/// Temporary title used while breaking title swaps; stays within `max_len` characters.
pub fn temporary_title(title: &str, max_len: usize) -> String {
    let suffix = Uuid::new_v4().to_string();
    let keep = max_len.saturating_sub(suffix.len());
    let prefix: String = title.chars().take(keep).collect();
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uid_shape() {
        let uid = generate_short_uid();
        assert_eq!(uid.len(), SHORT_UID_LENGTH);
        assert!(uid.chars().next().unwrap().is_ascii_lowercase());
        assert!(uid.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(uid, generate_short_uid());
    }

    #[test]
    fn temporary_title_is_bounded() {
        let long = "x".repeat(300);
        let tmp = temporary_title(&long, 190);
        assert_eq!(tmp.chars().count(), 190);

        let tmp = temporary_title("cpu", 190);
        assert!(tmp.starts_with("cpu"));
        assert_eq!(tmp.len(), 3 + 36);
    }
}
