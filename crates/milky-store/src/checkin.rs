use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use milky_core::UserRecord;
use milky_settings::CheckinSettings;

use crate::error::StoreError;
use crate::state::StateStore;

/// Daily check-in scoring: `base + bonus * (streak - 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckinRules {
    pub base_points: u64,
    pub streak_bonus: u64,
}

impl Default for CheckinRules {
    fn default() -> Self {
        Self::from(&CheckinSettings::default())
    }
}

impl From<&CheckinSettings> for CheckinRules {
    fn from(s: &CheckinSettings) -> Self {
        Self {
            base_points: s.base_points,
            streak_bonus: s.streak_bonus,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckinOutcome {
    CheckedIn { earned: u64, record: UserRecord },
    AlreadyCheckedIn { record: UserRecord },
}

impl CheckinRules {
    /// Apply a check-in on `today` to `record` in place.
    pub fn apply(&self, record: &mut UserRecord, today: NaiveDate) -> CheckinOutcome {
        if record.last_checkin_date == Some(today) {
            return CheckinOutcome::AlreadyCheckedIn {
                record: record.clone(),
            };
        }
        let yesterday = today.pred_opt();
        let streak = match record.last_checkin_date {
            Some(last) if Some(last) == yesterday => record.consecutive_days.saturating_add(1),
            _ => 1,
        };
        let earned = self.base_points + self.streak_bonus * u64::from(streak - 1);
        record.points = record.points.saturating_add(earned);
        record.consecutive_days = streak;
        record.last_checkin_date = Some(today);
        CheckinOutcome::CheckedIn {
            earned,
            record: record.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointsAction {
    Add,
    Set,
    Remove,
}

/// How an operator edit treats `last_checkin_date`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LastCheckin {
    #[default]
    Keep,
    Reset,
    Set(NaiveDate),
}

impl LastCheckin {
    /// Parse the operator form: empty keeps, `reset` clears, else `YYYY-MM-DD`.
    pub fn parse(raw: Option<&str>) -> Result<Self, StoreError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::Keep),
            Some(s) if s.eq_ignore_ascii_case("reset") => Ok(Self::Reset),
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Self::Set)
                .map_err(|_| StoreError::InvalidInput(format!("bad date '{s}', expected YYYY-MM-DD"))),
        }
    }
}

impl StateStore {
    /// Check `user_id` in on `today`, creating the record lazily.
    pub fn checkin(&self, user_id: u64, today: NaiveDate, rules: &CheckinRules) -> CheckinOutcome {
        self.mutate(|s| rules.apply(s.user_data.entry(user_id).or_default(), today))
    }

    /// Operator point adjustment. Returns `(old, new)`; removal floors at 0.
    pub fn adjust_points(&self, user_id: u64, action: PointsAction, amount: u64) -> (u64, u64) {
        self.mutate(|s| {
            let record = s.user_data.entry(user_id).or_default();
            let old = record.points;
            record.points = match action {
                PointsAction::Add => old.saturating_add(amount),
                PointsAction::Set => amount,
                PointsAction::Remove => old.saturating_sub(amount),
            };
            (old, record.points)
        })
    }

    /// Operator edit of check-in fields.
    pub fn edit_checkin(
        &self,
        user_id: u64,
        points: Option<u64>,
        consecutive_days: Option<u32>,
        last_checkin: LastCheckin,
    ) -> UserRecord {
        self.mutate(|s| {
            let record = s.user_data.entry(user_id).or_default();
            if let Some(points) = points {
                record.points = points;
            }
            if let Some(days) = consecutive_days {
                record.consecutive_days = days;
            }
            match last_checkin {
                LastCheckin::Keep => {}
                LastCheckin::Reset => record.last_checkin_date = None,
                LastCheckin::Set(date) => record.last_checkin_date = Some(date),
            }
            record.clone()
        })
    }

    /// Zero the record without deleting it.
    pub fn reset_user(&self, user_id: u64) -> UserRecord {
        self.mutate(|s| {
            let record = s.user_data.entry(user_id).or_default();
            *record = UserRecord::default();
            record.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn streak_scenario() {
        let store = StateStore::new();
        let rules = CheckinRules::default();

        match store.checkin(1, day("2024-03-01"), &rules) {
            CheckinOutcome::CheckedIn { earned, record } => {
                assert_eq!(earned, 10);
                assert_eq!(record.points, 10);
                assert_eq!(record.consecutive_days, 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        match store.checkin(1, day("2024-03-02"), &rules) {
            CheckinOutcome::CheckedIn { earned, record } => {
                assert_eq!(earned, 15);
                assert_eq!(record.points, 25);
                assert_eq!(record.consecutive_days, 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Skip two days.
        match store.checkin(1, day("2024-03-05"), &rules) {
            CheckinOutcome::CheckedIn { earned, record } => {
                assert_eq!(earned, 10);
                assert_eq!(record.points, 35);
                assert_eq!(record.consecutive_days, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn same_day_is_rejected_without_change() {
        let store = StateStore::new();
        let rules = CheckinRules::default();
        store.checkin(1, day("2024-03-01"), &rules);
        let outcome = store.checkin(1, day("2024-03-01"), &rules);
        assert!(matches!(outcome, CheckinOutcome::AlreadyCheckedIn { ref record } if record.points == 10));
    }

    #[test]
    fn streak_across_month_boundary() {
        let rules = CheckinRules::default();
        let mut record = UserRecord {
            points: 0,
            last_checkin_date: Some(day("2024-02-29")),
            consecutive_days: 3,
        };
        rules.apply(&mut record, day("2024-03-01"));
        assert_eq!(record.consecutive_days, 4);
        assert_eq!(record.points, 25);
    }

    #[test]
    fn remove_points_floors_at_zero() {
        let store = StateStore::new();
        assert_eq!(store.adjust_points(9, PointsAction::Add, 30), (0, 30));
        assert_eq!(store.adjust_points(9, PointsAction::Remove, 100), (30, 0));
        assert_eq!(store.adjust_points(9, PointsAction::Set, 7), (0, 7));
    }

    #[test]
    fn edit_and_reset() {
        let store = StateStore::new();
        store.checkin(2, day("2024-01-01"), &CheckinRules::default());
        let record = store.edit_checkin(2, Some(99), Some(5), LastCheckin::Reset);
        assert_eq!(record.points, 99);
        assert_eq!(record.consecutive_days, 5);
        assert!(record.last_checkin_date.is_none());

        let record = store.reset_user(2);
        assert_eq!(record, UserRecord::default());
        assert!(store.user(2).is_some());
    }

    #[test]
    fn last_checkin_parse() {
        assert_eq!(LastCheckin::parse(None).unwrap(), LastCheckin::Keep);
        assert_eq!(LastCheckin::parse(Some("RESET")).unwrap(), LastCheckin::Reset);
        assert_eq!(
            LastCheckin::parse(Some("2024-05-06")).unwrap(),
            LastCheckin::Set(day("2024-05-06"))
        );
        assert!(LastCheckin::parse(Some("yesterday")).is_err());
    }
}
