//! Session filter parameters shared by the CLI and the HTTP API.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use clap::Args;
use serde::Deserialize;

use mystnode_sessions::{Direction, Identity, Query};

#[derive(Args, Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterArgs {
    /// Filter by direction (export, import)
    #[arg(long)]
    pub direction: Option<String>,

    /// Filter by consumer identity
    #[arg(long)]
    #[serde(alias = "consumer_id")]
    pub consumer: Option<String>,

    /// Filter by provider identity
    #[arg(long)]
    #[serde(alias = "provider_id")]
    pub provider: Option<String>,

    /// Sessions started on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub after: Option<String>,

    /// Sessions started on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub before: Option<String>,

    /// Sessions started within the last N days
    #[arg(long)]
    pub days: Option<u32>,
}

impl FilterArgs {
    /// Build a query with one filter per given parameter.
    pub fn to_query(&self, now: DateTime<Utc>) -> Result<Query> {
        let mut query = Query::new();

        if let Some(ref direction) = self.direction {
            let direction: Direction = direction.parse().map_err(anyhow::Error::msg)?;
            query.filter_direction(direction);
        }

        if let Some(ref consumer) = self.consumer {
            query.filter_consumer(Identity::new(consumer.as_str()));
        }

        if let Some(ref provider) = self.provider {
            query.filter_provider(Identity::new(provider.as_str()));
        }

        if let Some(ref after) = self.after {
            query.filter_started_after(start_of_day(parse_day(after, "after")?, "after")?);
        }

        if let Some(ref before) = self.before {
            let date = parse_day(before, "before")?;
            let next = date
                .succ_opt()
                .with_context(|| format!("Invalid before date: {}", before))?;
            query.filter_started_until(start_of_day(next, "before")?);
        }

        if let Some(days) = self.days {
            let since = TimeDelta::try_days(i64::from(days))
                .and_then(|window| now.checked_sub_signed(window))
                .with_context(|| format!("Invalid days window: {}", days))?;
            query.filter_started_after(since);
        }

        Ok(query)
    }
}

fn parse_day(value: &str, name: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid {} date: {}", name, e))
}

fn start_of_day(date: NaiveDate, name: &str) -> Result<DateTime<Utc>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid {} date: {}", name, date))?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mystnode_sessions::SessionHistory;

    fn session(direction: Direction, day: u32) -> SessionHistory {
        SessionHistory {
            session_id: format!("s{}", day),
            consumer_id: Identity::new("0xa"),
            provider_id: Identity::new("0xp"),
            direction,
            data_sent: 0,
            data_received: 0,
            tokens: 0,
            started: Utc.with_ymd_and_hms(2020, 3, day, 18, 0, 0).unwrap(),
            ended: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_args_match_everything() {
        let query = FilterArgs::default().to_query(now()).unwrap();
        assert!(query.matches_all(&session(Direction::Import, 1)));
    }

    #[test]
    fn test_date_bounds_cover_whole_days() {
        let args = FilterArgs {
            after: Some("2020-03-02".to_string()),
            before: Some("2020-03-04".to_string()),
            ..Default::default()
        };
        let query = args.to_query(now()).unwrap();

        assert!(!query.matches_all(&session(Direction::Export, 1)));
        assert!(query.matches_all(&session(Direction::Export, 2)));
        assert!(query.matches_all(&session(Direction::Export, 4)));
        assert!(!query.matches_all(&session(Direction::Export, 5)));
    }

    #[test]
    fn test_before_includes_last_second_of_day() {
        let args = FilterArgs {
            before: Some("2020-03-04".to_string()),
            ..Default::default()
        };
        let query = args.to_query(now()).unwrap();

        let mut late = session(Direction::Export, 4);
        late.started = Utc.with_ymd_and_hms(2020, 3, 4, 23, 59, 59).unwrap()
            + TimeDelta::milliseconds(500);
        assert!(query.matches_all(&late));

        let mut midnight = session(Direction::Export, 5);
        midnight.started = Utc.with_ymd_and_hms(2020, 3, 5, 0, 0, 0).unwrap();
        assert!(!query.matches_all(&midnight));
    }

    #[test]
    fn test_last_days_window() {
        let args = FilterArgs {
            days: Some(3),
            direction: Some("export".to_string()),
            ..Default::default()
        };
        let query = args.to_query(now()).unwrap();

        assert!(query.matches_all(&session(Direction::Export, 8)));
        assert!(!query.matches_all(&session(Direction::Export, 6)));
        assert!(!query.matches_all(&session(Direction::Import, 8)));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let bad_direction = FilterArgs {
            direction: Some("both".to_string()),
            ..Default::default()
        };
        assert!(bad_direction.to_query(now()).is_err());

        let bad_date = FilterArgs {
            after: Some("03/01/2020".to_string()),
            ..Default::default()
        };
        let err = bad_date.to_query(now()).unwrap_err();
        assert!(err.to_string().contains("Invalid after date"));
    }

    #[test]
    fn test_days_window_out_of_range_is_error() {
        let args = FilterArgs {
            days: Some(u32::MAX),
            ..Default::default()
        };
        let err = args.to_query(now()).unwrap_err();
        assert!(err.to_string().contains("Invalid days window"));
    }

    #[test]
    fn test_query_params_accept_id_names() {
        let args: FilterArgs =
            serde_json::from_value(serde_json::json!({"consumer_id": "0xb", "provider_id": "0xp"}))
                .unwrap();
        assert_eq!(args.consumer.as_deref(), Some("0xb"));
        assert_eq!(args.provider.as_deref(), Some("0xp"));

        let unknown = serde_json::from_value::<FilterArgs>(serde_json::json!({"consumerid": "0xb"}));
        assert!(unknown.is_err());
    }
}
