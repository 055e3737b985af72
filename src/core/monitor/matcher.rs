//! Batch-to-rule matching.
//!
//! A rule fires for a batch when at least one event sits exactly in the
//! rule's anchor directory, its basename matches one of the rule's glob
//! patterns, and the rule's optional cron schedule is due at the current
//! minute. Matches collapse on the rule command, so a burst touching many
//! files triggers each command once per batch.

use crate::config::MonitorRule;
use crate::core::monitor::aggregator::DirectoryBatch;
use crate::core::monitor::event::FileEvent;
use crate::err::Result;
use crate::utilities::AsyncLogger;
use chrono::{DateTime, Local, Timelike};
use globset::Glob;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Pick every enabled rule the batch triggers, collapsed per command, each
/// paired with the single representative event for placeholder expansion.
pub fn match_rules<'a>(
    rules: &'a [MonitorRule],
    batch: &DirectoryBatch,
    logger: &AsyncLogger,
) -> Vec<(&'a MonitorRule, FileEvent)> {
    let mut matched: HashMap<&str, &MonitorRule> = HashMap::new();
    let mut first_event: Option<&FileEvent> = None;

    for event in batch.events.values() {
        for rule in rules.iter().filter(|r| r.enabled) {
            if event.directory != Path::new(&rule.directory) {
                continue;
            }
            if !matches_file_patterns(&event.file_name(), &rule.file_patterns) {
                continue;
            }
            if !rule.schedule.is_empty() && !is_schedule_due(&rule.schedule, logger) {
                continue;
            }

            if first_event.is_none() {
                first_event = Some(event);
            }
            matched.insert(rule.command.as_str(), rule);
        }
    }

    let Some(first) = first_event else {
        return Vec::new();
    };
    matched
        .into_values()
        .map(|rule| (rule, first.clone()))
        .collect()
}

/// POSIX-fnmatch-style glob match (`*`, `?`, `[...]`) of a basename against
/// any of the rule's patterns. Unparseable patterns never match.
pub fn matches_file_patterns(file_name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        Glob::new(pattern)
            .map(|g| g.compile_matcher().is_match(file_name))
            .unwrap_or(false)
    })
}

/// Whether a 5-field cron expression is due at the current wall-clock
/// minute. Parse errors are logged and count as not due.
pub fn is_schedule_due(schedule: &str, logger: &AsyncLogger) -> bool {
    match schedule_includes(schedule, Local::now()) {
        Ok(due) => {
            if !due {
                logger.debug(format!("Schedule not due, skipping: {}", schedule));
            }
            due
        }
        Err(err) => {
            logger.error(format!(
                "Failed to parse schedule expression {}: {}",
                schedule, err
            ));
            false
        }
    }
}

fn schedule_includes(schedule: &str, at: DateTime<Local>) -> Result<bool> {
    let parsed = parse_schedule(schedule)?;
    let minute = at
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at);
    Ok(parsed.includes(minute))
}

/// Parse a standard 5-field cron expression.
///
/// Two adaptations are needed for the cron crate: it wants a seconds field
/// (pinned to 0 here), and it numbers weekdays 1-7 from Sunday while
/// standard cron uses 0-6 with 7 as an alias for Sunday. Numeric tokens in
/// the day-of-week field are rewritten accordingly.
pub fn parse_schedule(schedule: &str) -> Result<cron::Schedule> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    if fields.len() != 5 {
        return Err("cron expression must contain 5 fields".into());
    }
    let dow = normalize_day_of_week(fields[4])?;
    let expr = format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], dow
    );
    Ok(cron::Schedule::from_str(&expr)?)
}

fn normalize_day_of_week(field: &str) -> Result<String> {
    // Tokens without digits (names, `*`, `*/n`, `?`) already mean the same
    // thing to the cron crate.
    if !field.chars().any(|c| c.is_ascii_digit()) || field.starts_with('*') {
        return Ok(field.to_string());
    }

    let mut parts = Vec::new();
    for part in field.split(',') {
        if !part.chars().any(|c| c.is_ascii_digit()) || part.starts_with('*') {
            parts.push(part.to_string());
            continue;
        }
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step.parse::<usize>()?)),
            None => (part, None),
        };
        let days: Vec<u8> = match range.split_once('-') {
            Some((a, b)) => {
                let a = parse_standard_dow(a)?;
                let b = parse_standard_dow(b)?;
                if a > b {
                    return Err(format!("invalid day-of-week range: {}", part).into());
                }
                (a..=b).collect()
            }
            None => vec![parse_standard_dow(range)?],
        };
        let stepped: Vec<u8> = match step {
            Some(s) if s > 0 => days.into_iter().step_by(s).collect(),
            Some(_) => return Err(format!("invalid step in day-of-week: {}", part).into()),
            None => days,
        };
        for day in stepped {
            // Standard 0-7 (both ends Sunday) to the crate's 1-7 from Sunday.
            parts.push(((day % 7) + 1).to_string());
        }
    }
    Ok(parts.join(","))
}

fn parse_standard_dow(token: &str) -> Result<u8> {
    let value: u8 = token
        .parse()
        .map_err(|_| format!("invalid day-of-week value: {}", token))?;
    if value > 7 {
        return Err(format!("day-of-week out of range: {}", token).into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::event::FileEventType;
    use crate::utilities::logger::test_logger;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn rule(directory: &str, command: &str, patterns: &[&str]) -> MonitorRule {
        MonitorRule {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            directory: directory.into(),
            command: command.into(),
            file_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            timeout: Some(5),
            schedule: String::new(),
            enabled: true,
            debounce_seconds: 0,
        }
    }

    fn batch(dir: &str, names: &[&str]) -> DirectoryBatch {
        let mut events = HashMap::new();
        for name in names {
            let path = PathBuf::from(format!("{}/{}", dir, name));
            events.insert(
                path.clone(),
                FileEvent::new(FileEventType::Created, path),
            );
        }
        DirectoryBatch {
            directory: PathBuf::from(dir),
            events,
        }
    }

    #[test]
    fn matches_only_exact_anchor_directory() {
        let rules = vec![rule("/tmp/in", "echo hit", &["*.csv"])];
        let logger = test_logger();

        let hits = match_rules(&rules, &batch("/tmp/in", &["a.csv"]), &logger);
        assert_eq!(hits.len(), 1);

        // A subdirectory of the anchor never fires the rule.
        let hits = match_rules(&rules, &batch("/tmp/in/sub", &["a.csv"]), &logger);
        assert!(hits.is_empty());

        let hits = match_rules(&rules, &batch("/tmp/other", &["a.csv"]), &logger);
        assert!(hits.is_empty());
    }

    #[test]
    fn glob_patterns_follow_fnmatch_semantics() {
        assert!(matches_file_patterns("a.csv", &["*.csv".into()]));
        assert!(!matches_file_patterns("a.txt", &["*.csv".into()]));
        assert!(matches_file_patterns("a1.log", &["a?.log".into()]));
        assert!(matches_file_patterns("data3.bin", &["data[0-9].bin".into()]));
        assert!(!matches_file_patterns("datax.bin", &["data[0-9].bin".into()]));
        // Any pattern in the list suffices.
        assert!(matches_file_patterns(
            "x.json",
            &["*.csv".into(), "*.json".into()]
        ));
        // Broken patterns never match.
        assert!(!matches_file_patterns("a.csv", &["[".into()]));
    }

    #[test]
    fn burst_collapses_to_one_trigger_per_command() {
        let rules = vec![rule("/tmp/in", "process.sh", &["*.csv"])];
        let logger = test_logger();

        let hits = match_rules(
            &rules,
            &batch("/tmp/in", &["a.csv", "b.csv", "c.csv"]),
            &logger,
        );
        assert_eq!(hits.len(), 1, "one command, one trigger");
        let (matched_rule, event) = &hits[0];
        assert_eq!(matched_rule.command, "process.sh");
        assert!(["a.csv", "b.csv", "c.csv"].contains(&event.file_name().as_str()));
    }

    #[test]
    fn two_rules_same_directory_both_fire_once() {
        let rules = vec![
            rule("/tmp/in", "first.sh", &["*.txt"]),
            rule("/tmp/in", "second.sh", &["*.txt"]),
        ];
        let logger = test_logger();

        let hits = match_rules(&rules, &batch("/tmp/in", &["x.txt"]), &logger);
        let mut commands: Vec<_> = hits.iter().map(|(r, _)| r.command.clone()).collect();
        commands.sort();
        assert_eq!(commands, vec!["first.sh", "second.sh"]);
    }

    #[test]
    fn disabled_rules_never_match() {
        let mut r = rule("/tmp/in", "echo hit", &["*.csv"]);
        r.enabled = false;
        let logger = test_logger();
        let rules = [r];
        let hits = match_rules(&rules, &batch("/tmp/in", &["a.csv"]), &logger);
        assert!(hits.is_empty());
    }

    #[test]
    fn wildcard_schedule_is_always_due() {
        let logger = test_logger();
        assert!(is_schedule_due("* * * * *", &logger));
    }

    #[test]
    fn schedule_is_checked_at_minute_precision() {
        let at = Local.with_ymd_and_hms(2026, 3, 2, 9, 30, 45).unwrap();
        // Due regardless of the 45-second offset.
        assert!(schedule_includes("30 9 * * *", at).unwrap());
        assert!(!schedule_includes("31 9 * * *", at).unwrap());
        assert!(schedule_includes("*/5 * * * *", at).unwrap());
        // 2026-03-02 is a Monday.
        assert!(schedule_includes("30 9 * * 1", at).unwrap());
        assert!(!schedule_includes("30 9 * * 2", at).unwrap());
    }

    #[test]
    fn day_of_week_uses_standard_numbering() {
        // 2026-03-01 is a Sunday.
        let sunday = Local.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let monday = Local.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let friday = Local.with_ymd_and_hms(2026, 3, 6, 8, 0, 0).unwrap();

        assert!(schedule_includes("0 8 * * 0", sunday).unwrap());
        assert!(schedule_includes("0 8 * * 7", sunday).unwrap());
        assert!(!schedule_includes("0 8 * * 0", monday).unwrap());

        assert!(schedule_includes("0 8 * * 1-5", monday).unwrap());
        assert!(schedule_includes("0 8 * * 1-5", friday).unwrap());
        assert!(!schedule_includes("0 8 * * 1-5", sunday).unwrap());

        assert!(schedule_includes("0 8 * * mon-fri", monday).unwrap());
    }

    #[test]
    fn malformed_schedule_counts_as_not_due() {
        let logger = test_logger();
        assert!(!is_schedule_due("not a cron", &logger));
        assert!(!is_schedule_due("99 * * * *", &logger));
    }

    #[test]
    fn rule_with_due_schedule_matches() {
        let mut r = rule("/tmp/in", "echo hit", &["*.csv"]);
        r.schedule = "* * * * *".into();
        let logger = test_logger();
        let rules = [r];
        let hits = match_rules(&rules, &batch("/tmp/in", &["a.csv"]), &logger);
        assert_eq!(hits.len(), 1);
    }
}
