use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

// NYSE closes at 16:00 ET (20:00/21:00 UTC depending on DST). Anything earlier
// than this UTC cutoff resolves to the previous session.
const CLOSE_CUTOFF_HOUR_UTC: u32 = 21;
const CLOSE_CUTOFF_MINUTE_UTC: u32 = 30;

pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return Ok(NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?);
    }

    let cutoff_reached =
        (now_utc.hour(), now_utc.minute()) >= (CLOSE_CUTOFF_HOUR_UTC, CLOSE_CUTOFF_MINUTE_UTC);
    let mut date = now_utc.date_naive();
    if !cutoff_reached {
        date = date - Duration::days(1);
    }

    Ok(previous_trading_day_inclusive(date, &configured_holidays()))
}

/// Rolls `date` back until it lands on a weekday that is not a holiday.
pub fn previous_trading_day_inclusive(mut date: NaiveDate, holidays: &HashSet<NaiveDate>) -> NaiveDate {
    while is_weekend(date) || holidays.contains(&date) {
        date = date - Duration::days(1);
    }
    date
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !is_weekend(date) && !configured_holidays().contains(&date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn configured_holidays() -> HashSet<NaiveDate> {
    // Fixed-date closures only. Floating holidays come from
    // MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
    let mut out = HashSet::new();
    for y in 2024..=2030 {
        for (m, d) in [(1, 1), (6, 19), (7, 4), (12, 25)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    if let Ok(s) = std::env::var("MARKET_HOLIDAYS") {
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Ok(d) = NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                out.insert(d);
            }
        }
    }

    out
}
