use chrono::{DateTime, Utc};
use cleanops_common::{CleanOpsError, ScheduleConfig, UpcomingSchedule};
use rrule::RRuleSet;

#[derive(Debug, Clone)]
struct Schedule {
    name: String,
    pipeline_id: String,
    pipeline_name: String,
    rules: RRuleSet,
}

/// Configured recurring schedules, parsed once at startup.
#[derive(Debug, Clone, Default)]
pub struct ScheduleBook {
    schedules: Vec<Schedule>,
    limit: usize,
}

impl ScheduleBook {
    /// Parse every schedule. An invalid rule is a configuration error.
    pub fn new(configs: &[ScheduleConfig], limit: usize) -> Result<Self, CleanOpsError> {
        let schedules = configs
            .iter()
            .map(|config| {
                Ok(Schedule {
                    name: config.name.clone(),
                    pipeline_id: config.pipeline_id.clone(),
                    pipeline_name: config
                        .pipeline_name
                        .clone()
                        .unwrap_or_else(|| config.pipeline_id.clone()),
                    rules: parse_rules(config)?,
                })
            })
            .collect::<Result<Vec<_>, CleanOpsError>>()?;

        Ok(Self { schedules, limit })
    }

    /// Each schedule's next occurrence strictly after `after`, soonest first,
    /// capped at the configured limit. Exhausted schedules are left out.
    pub fn upcoming(&self, after: DateTime<Utc>) -> Vec<UpcomingSchedule> {
        let mut upcoming: Vec<UpcomingSchedule> = self
            .schedules
            .iter()
            .filter_map(|schedule| {
                let next_run = next_occurrence(&schedule.rules, after)?;
                Some(UpcomingSchedule {
                    schedule_name: schedule.name.clone(),
                    pipeline_id: schedule.pipeline_id.clone(),
                    pipeline_name: schedule.pipeline_name.clone(),
                    next_run,
                })
            })
            .collect();

        upcoming.sort_by(|a, b| {
            a.next_run
                .cmp(&b.next_run)
                .then_with(|| a.schedule_name.cmp(&b.schedule_name))
        });
        upcoming.truncate(self.limit);
        upcoming
    }
}

fn parse_rules(config: &ScheduleConfig) -> Result<RRuleSet, CleanOpsError> {
    let body = config.rrule.trim();
    let body = body.strip_prefix("RRULE:").unwrap_or(body);
    let text = format!(
        "DTSTART:{}\nRRULE:{body}",
        config.dtstart.format("%Y%m%dT%H%M%SZ")
    );
    text.parse::<RRuleSet>().map_err(|e| {
        CleanOpsError::Config(format!("schedule {:?} has an invalid rrule: {e}", config.name))
    })
}

/// `RRuleSet::after` includes an occurrence equal to its bound, so take two
/// and keep the first one strictly later.
fn next_occurrence(rules: &RRuleSet, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    rules
        .clone()
        .after(after.with_timezone(&rrule::Tz::UTC))
        .all(2)
        .dates
        .into_iter()
        .map(|d| d.with_timezone(&Utc))
        .find(|d| *d > after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(name: &str, rrule: &str) -> ScheduleConfig {
        ScheduleConfig {
            name: name.to_string(),
            pipeline_id: format!("{name}-pipeline"),
            pipeline_name: None,
            dtstart: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            rrule: rrule.to_string(),
        }
    }

    #[test]
    fn upcoming_is_soonest_first_and_capped() {
        let book = ScheduleBook::new(
            &[
                schedule("daily", "FREQ=DAILY"),
                schedule("hourly", "RRULE:FREQ=HOURLY"),
                schedule("weekly", "FREQ=WEEKLY"),
            ],
            2,
        )
        .unwrap();

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap();
        let upcoming = book.upcoming(now);

        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].schedule_name, "hourly");
        assert_eq!(upcoming[0].next_run, Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap());
        assert_eq!(upcoming[1].schedule_name, "daily");
        assert_eq!(upcoming[1].pipeline_name, "daily-pipeline");
    }

    #[test]
    fn occurrence_at_the_clock_is_not_upcoming() {
        let book = ScheduleBook::new(&[schedule("hourly", "FREQ=HOURLY")], 5).unwrap();
        let on_the_hour = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(
            book.upcoming(on_the_hour)[0].next_run,
            Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn last_occurrence_at_the_clock_leaves_nothing_upcoming() {
        let book = ScheduleBook::new(&[schedule("twice", "FREQ=DAILY;COUNT=2")], 5).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        assert!(book.upcoming(second).is_empty());
        assert_eq!(
            book.upcoming(second - chrono::Duration::seconds(1))[0].next_run,
            second
        );
    }

    #[test]
    fn exhausted_schedule_is_omitted() {
        let book = ScheduleBook::new(&[schedule("once", "FREQ=DAILY;COUNT=1")], 5).unwrap();
        assert!(book.upcoming(Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()).is_empty());
    }

    #[test]
    fn invalid_rule_is_a_config_error() {
        let err = ScheduleBook::new(&[schedule("bad", "FREQ=SOMETIMES")], 5).unwrap_err();
        assert!(matches!(err, CleanOpsError::Config(_)));
    }
}
