//! Command-line interface parsing for the tracker client
//!
//! Cache lifecycle commands (`install`, `activate`, `fetch`, ...) drive the
//! offline cache; data commands (`log`, `recent`, `settings`, `stats`) talk to
//! the remote endpoint.

use chrono::{Datelike, Duration, Local, NaiveDate};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

use crate::api::RECENT_LIST_DAYS;
use crate::config::Overrides;
use crate::notify::NotificationAction;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The date is not in YYYY-MM-DD form
    #[error("Invalid date: '{0}'. Expected YYYY-MM-DD")]
    InvalidDate(String),

    /// A header is not in `Name: value` form
    #[error("Invalid header: '{0}'. Expected 'Name: value'")]
    InvalidHeader(String),

    /// The month is outside 1-12
    #[error("Invalid month: {0}. Expected 1-12")]
    InvalidMonth(u32),
}

/// Alcohol tracker client with an offline asset cache
#[derive(Parser, Debug)]
#[command(name = "alcotrack")]
#[command(about = "Log drinks, view statistics and manage the offline asset cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding cache generations
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Origin the static assets are served from
    #[arg(long, global = true, value_name = "URL")]
    pub origin: Option<String>,

    /// Data endpoint URL
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Precache the asset manifest into the configured version
    Install,

    /// Activate the installed version and delete stale generations
    Activate,

    /// Fetch a URL through the offline cache
    Fetch {
        /// URL or origin-relative path
        url: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Extra request header, e.g. -H 'Accept: text/html'
        #[arg(short = 'H', long = "header", value_parser = parse_header_arg)]
        headers: Vec<(String, String)>,

        /// Write the body to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show active and waiting versions and stored generations
    Status,

    /// Simulate a push and print the reminder notification
    Push,

    /// Simulate a click on the reminder notification
    Click {
        /// Action clicked: open or close
        #[arg(value_parser = parse_action_arg)]
        action: NotificationAction,
    },

    /// Log the number of drinks for a day
    Log {
        /// Number of drinks
        drinks: u32,

        /// Day to log (YYYY-MM-DD), defaults to yesterday
        #[arg(short, long, value_parser = parse_date_arg)]
        date: Option<NaiveDate>,
    },

    /// Show recent entries
    Recent {
        /// Number of days to look back
        #[arg(short, long, default_value_t = RECENT_LIST_DAYS)]
        days: u32,
    },

    /// Read or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },

    /// Show monthly or yearly statistics
    Stats {
        #[command(subcommand)]
        period: StatsPeriod,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Print all settings
    Get,
    /// Change one setting; the value is parsed as JSON when possible
    Set { name: String, value: String },
}

#[derive(Subcommand, Debug)]
pub enum StatsPeriod {
    /// Statistics for one month (defaults to the current month)
    Month {
        #[arg(short, long, value_parser = parse_month_arg)]
        month: Option<u32>,
        #[arg(short, long)]
        year: Option<i32>,
    },
    /// Statistics for one year (defaults to the current year)
    Year {
        #[arg(short, long)]
        year: Option<i32>,
    },
}

impl Cli {
    /// Config values given on the command line
    pub fn overrides(&self) -> Overrides {
        Overrides {
            endpoint: self.endpoint.clone(),
            origin: self.origin.clone(),
            cache_dir: self.cache_dir.clone(),
        }
    }
}

/// Parses a YYYY-MM-DD date argument
pub fn parse_date_arg(s: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| CliError::InvalidDate(s.to_string()))
}

/// Parses a `Name: value` header argument
pub fn parse_header_arg(s: &str) -> Result<(String, String), CliError> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| CliError::InvalidHeader(s.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidHeader(s.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

pub fn parse_month_arg(s: &str) -> Result<u32, String> {
    let month: u32 = s.parse().map_err(|_| format!("Invalid month: '{}'", s))?;
    if (1..=12).contains(&month) {
        Ok(month)
    } else {
        Err(CliError::InvalidMonth(month).to_string())
    }
}

pub fn parse_action_arg(s: &str) -> Result<NotificationAction, String> {
    NotificationAction::parse(s).map_err(|e| e.to_string())
}

/// A setting value: JSON if it parses, otherwise a plain string
pub fn parse_setting_value(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
}

/// The day before `today`, the default day to log
pub fn default_log_date(today: NaiveDate) -> NaiveDate {
    today - Duration::days(1)
}

/// Today's local date
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Current (month, year) in local time
pub fn current_month() -> (u32, i32) {
    let now = today();
    (now.month(), now.year())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_arg() {
        assert_eq!(
            parse_date_arg("2024-07-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
        );
        let err = parse_date_arg("15/07/2024").unwrap_err();
        assert!(err.to_string().contains("Invalid date"));
        assert!(parse_date_arg("2024-02-30").is_err());
    }

    #[test]
    fn test_parse_header_arg() {
        assert_eq!(
            parse_header_arg("Accept: text/html").unwrap(),
            ("Accept".to_string(), "text/html".to_string())
        );
        assert!(parse_header_arg("no-colon").is_err());
        assert!(parse_header_arg(": value").is_err());
    }

    #[test]
    fn test_parse_month_arg() {
        assert_eq!(parse_month_arg("12").unwrap(), 12);
        assert!(parse_month_arg("0").is_err());
        assert!(parse_month_arg("13").is_err());
        assert!(parse_month_arg("june").is_err());
    }

    #[test]
    fn test_parse_setting_value() {
        assert_eq!(parse_setting_value("7"), Value::from(7));
        assert_eq!(parse_setting_value("true"), Value::Bool(true));
        assert_eq!(parse_setting_value("evening"), Value::String("evening".to_string()));
    }

    #[test]
    fn test_default_log_date_is_yesterday() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            default_log_date(today),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }

    #[test]
    fn test_cli_parse_install() {
        let cli = Cli::parse_from(["alcotrack", "install"]);
        assert!(matches!(cli.command, Command::Install));
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_parse_fetch_with_headers() {
        let cli = Cli::parse_from([
            "alcotrack",
            "fetch",
            "/data.json",
            "-H",
            "Accept: application/json",
            "-vv",
        ]);
        match cli.command {
            Command::Fetch {
                url,
                method,
                headers,
                output,
            } => {
                assert_eq!(url, "/data.json");
                assert_eq!(method, "GET");
                assert_eq!(headers.len(), 1);
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_parse_log_with_date() {
        let cli = Cli::parse_from(["alcotrack", "log", "3", "--date", "2024-07-15"]);
        match cli.command {
            Command::Log { drinks, date } => {
                assert_eq!(drinks, 3);
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 7, 15));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_negative_drinks() {
        assert!(Cli::try_parse_from(["alcotrack", "log", "-1"]).is_err());
    }

    #[test]
    fn test_cli_parse_click_action() {
        let cli = Cli::parse_from(["alcotrack", "click", "open"]);
        assert!(matches!(
            cli.command,
            Command::Click {
                action: NotificationAction::Open
            }
        ));
        assert!(Cli::try_parse_from(["alcotrack", "click", "snooze"]).is_err());
    }

    #[test]
    fn test_cli_global_overrides() {
        let cli = Cli::parse_from([
            "alcotrack",
            "status",
            "--cache-dir",
            "/tmp/c",
            "--origin",
            "https://tracker.example",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.cache_dir, Some(PathBuf::from("/tmp/c")));
        assert_eq!(overrides.origin.as_deref(), Some("https://tracker.example"));
        assert!(overrides.endpoint.is_none());
    }

    #[test]
    fn test_cli_recent_default_days() {
        let cli = Cli::parse_from(["alcotrack", "recent"]);
        assert!(matches!(cli.command, Command::Recent { days: 14 }));
    }
}
