use std::fmt;

use serde::{Deserialize, Serialize};

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric, sequential within a chat).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// External identity of whoever sent a message (platform user id as text).
///
/// The same person talks to the main bot and to both report bots from different
/// chats, so this is what links a report subscription back to an account.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderHandle(pub String);

impl fmt::Display for SenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signed UTC offset with minute precision.
///
/// Kept as whole minutes so half-hour and 45-minute zones are first-class
/// map keys. Valid range is -12:00 ..= +12:00.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcOffset(i32);

impl UtcOffset {
    pub const MAX_MINUTES: i32 = 12 * 60;
    pub const UTC: UtcOffset = UtcOffset(0);

    pub fn from_minutes(minutes: i32) -> Option<Self> {
        if (-Self::MAX_MINUTES..=Self::MAX_MINUTES).contains(&minutes) {
            Some(Self(minutes))
        } else {
            None
        }
    }

    /// Build from a sign and an hour/minute pair, e.g. `(-1, 3, 30)` for -03:30.
    pub fn from_hm(sign: i32, hours: u32, minutes: u32) -> Option<Self> {
        if minutes >= 60 {
            return None;
        }
        let total = i32::try_from(hours.checked_mul(60)?.checked_add(minutes)?).ok()?;
        Self::from_minutes(if sign < 0 { -total } else { total })
    }

    pub fn minutes(self) -> i32 {
        self.0
    }

    pub fn as_duration(self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.0))
    }

    /// Wall-clock time at this offset for the given UTC instant.
    pub fn local_time(self, at: chrono::DateTime<chrono::Utc>) -> chrono::NaiveDateTime {
        at.naive_utc() + self.as_duration()
    }
}

impl fmt::Display for UtcOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { '-' } else { '+' };
        let abs = self.0.abs();
        write!(f, "UTC{sign}{}:{:02}", abs / 60, abs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_range_is_inclusive_at_twelve_hours() {
        assert!(UtcOffset::from_hm(1, 12, 0).is_some());
        assert!(UtcOffset::from_hm(-1, 12, 0).is_some());
        assert!(UtcOffset::from_hm(1, 12, 30).is_none());
        assert!(UtcOffset::from_hm(1, 5, 60).is_none());
    }

    #[test]
    fn huge_hours_are_rejected_not_wrapped() {
        assert!(UtcOffset::from_hm(1, u32::MAX, 0).is_none());
        assert!(UtcOffset::from_hm(-1, 71_582_789, 0).is_none());
    }

    #[test]
    fn offset_display_keeps_minutes() {
        let sri_lanka = UtcOffset::from_hm(1, 5, 30).unwrap();
        assert_eq!(sri_lanka.to_string(), "UTC+5:30");
        assert_eq!(UtcOffset::from_hm(-1, 7, 0).unwrap().to_string(), "UTC-7:00");
    }
}
