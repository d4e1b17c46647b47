//! Strike and ban bookkeeping
//!
//! Three moderation strikes ban a profile. Bans lift on their own ten
//! minutes later, and lifting clears the strike count.

use crate::db::Profile;
use chrono::{DateTime, Duration, Utc};

pub const STRIKE_LIMIT: u32 = 3;
pub const BAN_DURATION_SECS: i64 = 10 * 60;

/// What a recorded strike did to the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeOutcome {
    Warned { strikes: u32 },
    Banned { strikes: u32 },
}

impl Profile {
    pub fn unban_at(&self) -> Option<DateTime<Utc>> {
        if !self.banned {
            return None;
        }
        self.banned_at.map(|at| at + Duration::seconds(BAN_DURATION_SECS))
    }

    /// Banned and the ban has not yet run out
    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        self.banned && self.unban_at().map_or(true, |at| now < at)
    }

    /// Lift an elapsed ban; returns true if the profile changed
    pub fn lift_expired_ban(&mut self, now: DateTime<Utc>) -> bool {
        if !self.banned || self.is_banned(now) {
            return false;
        }
        self.banned = false;
        self.banned_at = None;
        self.strikes = 0;
        true
    }

    pub fn record_strike(&mut self, now: DateTime<Utc>) -> StrikeOutcome {
        self.strikes = self.strikes.saturating_add(1);
        if self.strikes >= STRIKE_LIMIT {
            if !self.banned {
                self.banned = true;
                self.banned_at = Some(now);
            }
            StrikeOutcome::Banned {
                strikes: self.strikes,
            }
        } else {
            StrikeOutcome::Warned {
                strikes: self.strikes,
            }
        }
    }
}
