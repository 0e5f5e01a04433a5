//! Store timestamps

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
///
/// This is the representation the session store uses for both local
/// wall-clock times and server-assigned times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Local wall-clock time
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Convert to a UTC datetime (None if out of range)
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }

    /// Render as local `HH:MM:SS`
    pub fn format_time(self) -> String {
        match self.to_datetime() {
            Some(dt) => dt.with_timezone(&Local).format("%H:%M:%S").to_string(),
            None => String::from("--:--:--"),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}
