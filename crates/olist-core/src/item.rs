//! The checklist entry value type and its canonical line encoding.
//!
//! A [`CheckItem`] is encoded as one line of a list blob:
//!
//! ```text
//! [✔] bread
//! [_] oat milk
//! ```
//!
//! Decoding is total: a line that does not match the encoding yields `None`
//! and is dropped by [`decode_lines`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker token for a checked item.
pub const CHECKED_MARK: &str = "[✔]";

/// Marker token for an unchecked item.
pub const UNCHECKED_MARK: &str = "[_]";

/// One entry of a checklist.
///
/// Equality and hashing cover both fields: the checked and unchecked
/// variants of the same text are distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckItem {
    text: String,
    checked: bool,
}

impl CheckItem {
    #[must_use]
    pub fn new(text: impl Into<String>, checked: bool) -> Self {
        Self {
            text: text.into(),
            checked,
        }
    }

    /// An unchecked item.
    #[must_use]
    pub fn unchecked(text: impl Into<String>) -> Self {
        Self::new(text, false)
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub const fn is_checked(&self) -> bool {
        self.checked
    }

    /// Return a copy with the checked flag inverted.
    #[must_use]
    pub fn toggle(&self) -> Self {
        Self {
            text: self.text.clone(),
            checked: !self.checked,
        }
    }

    /// Parse the canonical encoding.
    ///
    /// Splits on the first space; the leading token must be one of the two
    /// markers. Returns `None` for anything else.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let (mark, text) = line.split_once(' ')?;
        let checked = match mark {
            CHECKED_MARK => true,
            UNCHECKED_MARK => false,
            _ => return None,
        };
        Some(Self::new(text, checked))
    }
}

impl fmt::Display for CheckItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.checked {
            CHECKED_MARK
        } else {
            UNCHECKED_MARK
        };
        write!(f, "{mark} {}", self.text)
    }
}

/// Decode blob lines, silently dropping malformed records.
pub fn decode_lines<I, S>(lines: I) -> Vec<CheckItem>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let line = line.as_ref();
            let item = CheckItem::parse(line);
            if item.is_none() && !line.is_empty() {
                tracing::debug!(line, "dropping malformed list record");
            }
            item
        })
        .collect()
}

/// Encode items into blob lines, preserving order.
#[must_use]
pub fn encode_lines(items: &[CheckItem]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_both_states() {
        assert_eq!(CheckItem::new("bread", true).to_string(), "[✔] bread");
        assert_eq!(CheckItem::unchecked("milk").to_string(), "[_] milk");
    }

    #[test]
    fn parses_text_with_spaces() {
        let item = CheckItem::parse("[_] oat milk").expect("valid record");
        assert_eq!(item, CheckItem::unchecked("oat milk"));
    }

    #[test]
    fn toggle_is_an_involution() {
        let item = CheckItem::unchecked("eggs");
        assert!(item.toggle().is_checked());
        assert_eq!(item.toggle().toggle(), item);
    }

    #[test]
    fn checked_state_is_part_of_identity() {
        assert_ne!(CheckItem::new("eggs", true), CheckItem::new("eggs", false));
    }

    #[test]
    fn malformed_records_yield_none() {
        assert_eq!(CheckItem::parse("milk"), None);
        assert_eq!(CheckItem::parse(""), None);
        assert_eq!(CheckItem::parse("[x] milk"), None);
    }

    #[test]
    fn decode_drops_malformed_lines_and_keeps_order() {
        let items = decode_lines(["[✔] bread", "garbage", "", "[_] milk"]);
        assert_eq!(
            items,
            vec![CheckItem::new("bread", true), CheckItem::unchecked("milk")]
        );
    }

    #[test]
    fn encode_preserves_order() {
        let lines = encode_lines(&[CheckItem::unchecked("b"), CheckItem::new("a", true)]);
        assert_eq!(lines, vec!["[_] b".to_string(), "[✔] a".to_string()]);
    }
}
