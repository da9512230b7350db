use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use smartsheet_core::Timeouts;
use thiserror::Error;

use crate::sync::index::MatchColumn;

const DEFAULT_BASE_URL: &str = "https://api.smartsheet.com";
const DEFAULT_TEMP_DIR_NAME: &str = "smartsheet-attachments";
const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_SHEET_FETCH_ATTEMPTS: u32 = 3;
const MIN_TOKEN_LEN: usize = 20;

#[derive(Debug, Error)]
#[error("invalid configuration:\n  {}", .problems.join("\n  "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

#[derive(Clone)]
pub struct SyncConfig {
    pub api_token: String,
    pub base_url: String,
    pub source_sheet_id: i64,
    pub target_sheet_id: i64,
    pub source_match_column: MatchColumn,
    pub target_match_column: MatchColumn,
    pub temp_dir: PathBuf,
    pub concurrency: usize,
    pub sheet_fetch_attempts: u32,
    pub http_timeouts: Timeouts,
    pub fail_on_errors: bool,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("api_token", &"<hidden>")
            .field("base_url", &self.base_url)
            .field("source_sheet_id", &self.source_sheet_id)
            .field("target_sheet_id", &self.target_sheet_id)
            .field("source_match_column", &self.source_match_column)
            .field("target_match_column", &self.target_match_column)
            .field("temp_dir", &self.temp_dir)
            .field("concurrency", &self.concurrency)
            .field("sheet_fetch_attempts", &self.sheet_fetch_attempts)
            .field("http_timeouts", &self.http_timeouts)
            .field("fail_on_errors", &self.fail_on_errors)
            .finish()
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source, collecting
    /// every problem instead of stopping at the first one.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut problems = Vec::new();

        let api_token = match read("SMARTSHEET_API_KEY").or_else(|| read("SMARTSHEET_ACCESS_TOKEN"))
        {
            Some(token) if token.len() < MIN_TOKEN_LEN => {
                problems.push("SMARTSHEET_API_KEY appears to be invalid (too short)".to_string());
                String::new()
            }
            Some(token) => token,
            None => {
                problems.push("SMARTSHEET_API_KEY is required but not set".to_string());
                String::new()
            }
        };

        let mut required_id = |name: &str| match read(name) {
            Some(value) => match value.parse::<i64>() {
                Ok(id) if id > 0 => id,
                _ => {
                    problems.push(format!("{name} must be a positive integer, got {value:?}"));
                    0
                }
            },
            None => {
                problems.push(format!("{name} is required but not set"));
                0
            }
        };
        let source_sheet_id = required_id("SOURCE_SHEET_ID");
        let target_sheet_id = required_id("TARGET_SHEET_ID");

        let shared_column_name = read("MATCH_COLUMN_NAME");
        let source_match_column = match_column(
            "SOURCE",
            read("SOURCE_MATCH_COLUMN_ID"),
            read("SOURCE_MATCH_COLUMN_NAME").or_else(|| shared_column_name.clone()),
            &mut problems,
        );
        let target_match_column = match_column(
            "TARGET",
            read("TARGET_MATCH_COLUMN_ID"),
            read("TARGET_MATCH_COLUMN_NAME").or(shared_column_name),
            &mut problems,
        );

        let temp_dir = read("TEMP_DOWNLOAD_FOLDER")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_TEMP_DIR_NAME));
        let base_url = read("SMARTSHEET_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if url::Url::parse(&base_url).is_err() {
            problems.push(format!("SMARTSHEET_BASE_URL is not a valid url: {base_url:?}"));
        }
        let concurrency = positive(
            "SYNC_CONCURRENCY",
            read("SYNC_CONCURRENCY"),
            DEFAULT_CONCURRENCY,
            &mut problems,
        );
        let sheet_fetch_attempts = positive(
            "SHEET_FETCH_ATTEMPTS",
            read("SHEET_FETCH_ATTEMPTS"),
            DEFAULT_SHEET_FETCH_ATTEMPTS,
            &mut problems,
        );
        let http_timeouts = Timeouts {
            connect: Duration::from_secs(positive(
                "HTTP_CONNECT_TIMEOUT_SECS",
                read("HTTP_CONNECT_TIMEOUT_SECS"),
                Timeouts::default().connect.as_secs(),
                &mut problems,
            )),
            read: Duration::from_secs(positive(
                "HTTP_READ_TIMEOUT_SECS",
                read("HTTP_READ_TIMEOUT_SECS"),
                Timeouts::default().read.as_secs(),
                &mut problems,
            )),
        };
        let fail_on_errors = read("SYNC_FAIL_ON_ERRORS")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);

        if !problems.is_empty() {
            return Err(ConfigError { problems });
        }

        Ok(Self {
            api_token,
            base_url,
            source_sheet_id,
            target_sheet_id,
            source_match_column,
            target_match_column,
            temp_dir,
            concurrency,
            sheet_fetch_attempts,
            http_timeouts,
            fail_on_errors,
        })
    }

    pub fn log_summary(&self) {
        tracing::info!("Configuration loaded:");
        tracing::info!("  source sheet: {}", self.source_sheet_id);
        tracing::info!("  target sheet: {}", self.target_sheet_id);
        tracing::info!("  source match column: {}", self.source_match_column);
        tracing::info!("  target match column: {}", self.target_match_column);
        tracing::info!("  temp download folder: {}", self.temp_dir.display());
        tracing::info!("  concurrency: {}", self.concurrency);
        tracing::info!(
            "  http timeouts: connect {:?}, read {:?}",
            self.http_timeouts.connect,
            self.http_timeouts.read
        );
        tracing::info!("  api key: {} (hidden)", "*".repeat(20));
    }
}

/// Column selector for one side: `<SIDE>_MATCH_COLUMN_ID` wins over a title.
fn match_column(
    side: &str,
    id: Option<String>,
    title: Option<String>,
    problems: &mut Vec<String>,
) -> MatchColumn {
    let id_var = format!("{side}_MATCH_COLUMN_ID");
    match (id, title) {
        (Some(value), _) => match value.parse::<i64>() {
            Ok(id) if id > 0 => MatchColumn::Id(id),
            _ => {
                problems.push(format!("{id_var} must be a positive integer, got {value:?}"));
                MatchColumn::Id(0)
            }
        },
        (None, Some(title)) => MatchColumn::Title(title),
        (None, None) => {
            problems.push(format!(
                "{id_var} or {side}_MATCH_COLUMN_NAME is required but not set"
            ));
            MatchColumn::Id(0)
        }
    }
}

/// Optional positive number; a malformed or zero value is a problem, not a
/// silent fallback.
fn positive<T>(name: &str, value: Option<String>, default: T, problems: &mut Vec<String>) -> T
where
    T: FromStr + PartialEq + Default,
{
    let Some(value) = value else {
        return default;
    };
    match value.parse::<T>() {
        Ok(parsed) if parsed != T::default() => parsed,
        _ => {
            problems.push(format!("{name} must be a positive integer, got {value:?}"));
            default
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TOKEN: &str = "abcdefghijklmnopqrstuvwxyz";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SMARTSHEET_API_KEY", TOKEN),
            ("SOURCE_SHEET_ID", "1553121697288068"),
            ("TARGET_SHEET_ID", "4850043816202116"),
            ("SOURCE_MATCH_COLUMN_ID", "8022925527175044"),
            ("TARGET_MATCH_COLUMN_ID", "1437881091182468"),
        ]
    }

    #[test]
    fn loads_required_values_and_defaults() {
        let config = SyncConfig::from_lookup(lookup(&complete())).unwrap();
        assert_eq!(config.api_token, TOKEN);
        assert_eq!(config.source_sheet_id, 1553121697288068);
        assert_eq!(config.target_match_column, MatchColumn::Id(1437881091182468));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.sheet_fetch_attempts, 3);
        assert_eq!(config.http_timeouts, Timeouts::default());
        assert!(!config.fail_on_errors);
        assert!(config.temp_dir.ends_with(DEFAULT_TEMP_DIR_NAME));
    }

    #[test]
    fn reports_every_missing_value() {
        let err = SyncConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err.problems.len(), 5);
        assert!(err.to_string().contains("SOURCE_SHEET_ID is required"));
        assert!(
            err.to_string()
                .contains("TARGET_MATCH_COLUMN_ID or TARGET_MATCH_COLUMN_NAME is required")
        );
    }

    #[test]
    fn whitespace_only_counts_as_missing() {
        let mut vars = complete();
        vars[1] = ("SOURCE_SHEET_ID", "   ");
        let err = SyncConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(err.problems, vec!["SOURCE_SHEET_ID is required but not set"]);
    }

    #[test]
    fn rejects_short_token_and_non_numeric_ids() {
        let mut vars = complete();
        vars[0] = ("SMARTSHEET_API_KEY", "short");
        vars[3] = ("SOURCE_MATCH_COLUMN_ID", "Job #");
        let err = SyncConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(err.problems.len(), 2);
        assert!(err.problems[0].contains("too short"));
        assert!(err.problems[1].contains("SOURCE_MATCH_COLUMN_ID must be a positive integer"));
    }

    #[test]
    fn accepts_legacy_access_token_name() {
        let mut vars = complete();
        vars[0] = ("SMARTSHEET_ACCESS_TOKEN", TOKEN);
        let config = SyncConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.api_token, TOKEN);
    }

    #[test]
    fn reads_optional_tuning_values() {
        let mut vars = complete();
        vars.push(("SYNC_CONCURRENCY", "4"));
        vars.push(("SHEET_FETCH_ATTEMPTS", "5"));
        vars.push(("HTTP_READ_TIMEOUT_SECS", "120"));
        vars.push(("SYNC_FAIL_ON_ERRORS", "yes"));
        vars.push(("TEMP_DOWNLOAD_FOLDER", "/var/tmp/sheetsync"));
        let config = SyncConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.sheet_fetch_attempts, 5);
        assert_eq!(config.http_timeouts.read, Duration::from_secs(120));
        assert_eq!(config.http_timeouts.connect, Duration::from_secs(10));
        assert!(config.fail_on_errors);
        assert_eq!(config.temp_dir, PathBuf::from("/var/tmp/sheetsync"));
    }

    #[test]
    fn malformed_tuning_values_are_reported() {
        let mut vars = complete();
        vars.push(("SYNC_CONCURRENCY", "abc"));
        vars.push(("SHEET_FETCH_ATTEMPTS", "0"));
        vars.push(("HTTP_CONNECT_TIMEOUT_SECS", "-5"));
        let err = SyncConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(
            err.problems,
            vec![
                "SYNC_CONCURRENCY must be a positive integer, got \"abc\"",
                "SHEET_FETCH_ATTEMPTS must be a positive integer, got \"0\"",
                "HTTP_CONNECT_TIMEOUT_SECS must be a positive integer, got \"-5\"",
            ]
        );
    }

    #[test]
    fn match_columns_can_be_selected_by_title() {
        let vars: Vec<_> = complete()
            .into_iter()
            .filter(|(name, _)| !name.ends_with("_MATCH_COLUMN_ID"))
            .chain([
                ("SOURCE_MATCH_COLUMN_NAME", "Job #"),
                ("MATCH_COLUMN_NAME", "Job Number"),
            ])
            .collect();
        let config = SyncConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.source_match_column, MatchColumn::Title("Job #".into()));
        assert_eq!(
            config.target_match_column,
            MatchColumn::Title("Job Number".into())
        );
    }

    #[test]
    fn match_column_id_wins_over_title() {
        let mut vars = complete();
        vars.push(("TARGET_MATCH_COLUMN_NAME", "Job #"));
        let config = SyncConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.target_match_column, MatchColumn::Id(1437881091182468));
    }

    #[test]
    fn debug_output_hides_token() {
        let config = SyncConfig::from_lookup(lookup(&complete())).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains(TOKEN));
        assert!(rendered.contains("<hidden>"));
    }
}
