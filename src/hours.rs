//! Working-hours admission policy for the Sallaty client core.
//!
//! The store only takes orders inside a configured daily window. The
//! evaluator is pure — give it the window, a time-of-day, and a language,
//! and it answers whether orders are admitted right now plus the message
//! to show when they are not. Scheduling (re-check once a minute, re-check
//! on language change) and the actual alert UI belong to the caller; the
//! only state this module touches is the persisted last-shown timestamp
//! that rate-limits the alert.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::{self, DbState};

/// How often callers should re-evaluate the window.
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum spacing between out-of-hours alerts.
pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(4 * 60 * 60);

/// Fallback template when the configured window carries no message for
/// the requested language and no English one either.
const DEFAULT_TEMPLATE: &str = "Orders are accepted between {start} and {end}.";

// ---------------------------------------------------------------------------
// Window + evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHoursWindow {
    /// Opening time-of-day, second resolution.
    pub start: NaiveTime,
    /// Closing time-of-day, inclusive.
    pub end: NaiveTime,
    pub enabled: bool,
    /// Language code -> message template with `{start}`/`{end}`
    /// placeholders.
    #[serde(default)]
    pub messages: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub within_hours: bool,
    /// Empty while within hours.
    pub message: String,
}

/// Zero-padded `HH:MM` for display; seconds are compared but never shown.
fn display_time(t: NaiveTime) -> String {
    format!("{:02}:{:02}", t.hour(), t.minute())
}

/// Decide whether orders are admitted at `now`.
///
/// A disabled window always admits. Comparison is inclusive on both ends
/// at second resolution. The out-of-hours message comes from the window's
/// template for `language`, falling back to English, then to a built-in
/// default.
pub fn evaluate(window: &WorkingHoursWindow, now: NaiveTime, language: &str) -> Verdict {
    if !window.enabled {
        return Verdict {
            within_hours: true,
            message: String::new(),
        };
    }

    if now >= window.start && now <= window.end {
        return Verdict {
            within_hours: true,
            message: String::new(),
        };
    }

    let template = window
        .messages
        .get(language)
        .map(String::as_str)
        .or_else(|| window.messages.get("en").map(String::as_str))
        .unwrap_or(DEFAULT_TEMPLATE);

    let message = template
        .replace("{start}", &display_time(window.start))
        .replace("{end}", &display_time(window.end));

    debug!(%now, language, "outside working hours");
    Verdict {
        within_hours: false,
        message,
    }
}

// ---------------------------------------------------------------------------
// Alert rate limiting
// ---------------------------------------------------------------------------

const SETTINGS_CATEGORY: &str = "working_hours";
const LAST_ALERT_KEY: &str = "last_alert_at";

/// Rate-limits the out-of-hours alert across app restarts using the
/// persisted last-shown timestamp.
pub struct AlertGate {
    db: Arc<DbState>,
    cooldown: chrono::Duration,
}

impl AlertGate {
    pub fn new(db: Arc<DbState>) -> Self {
        Self::with_cooldown(db, DEFAULT_ALERT_COOLDOWN)
    }

    pub fn with_cooldown(db: Arc<DbState>, cooldown: Duration) -> Self {
        let cooldown =
            chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::hours(4));
        Self { db, cooldown }
    }

    /// Whether the alert may be shown at `now`. A `true` answer records
    /// `now` as the last-shown timestamp, so the next call inside the
    /// cooldown window answers `false`.
    pub fn should_show(&self, now: DateTime<Utc>) -> bool {
        let conn = match self.db.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };

        let last_shown = db::get_setting(&conn, SETTINGS_CATEGORY, LAST_ALERT_KEY)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc));

        if let Some(last) = last_shown {
            if now.signed_duration_since(last) < self.cooldown {
                return false;
            }
        }

        if let Err(e) = db::set_setting(&conn, SETTINGS_CATEGORY, LAST_ALERT_KEY, &now.to_rfc3339())
        {
            warn!(error = %e, "failed to record alert timestamp");
        }
        true
    }
}

// ===========================================================================
// Tests
// ===========================================================================
