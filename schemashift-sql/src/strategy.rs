//! DDL strategies and their option flags.
//!
//! A migration carries a strategy (how the change is executed) and a
//! free-form options string of `--flag[=value]` tokens. The options string
//! is stored verbatim on the migration row; this module is the single point
//! that interprets it.

use std::str::FromStr;
use std::time::Duration;

use strum::{Display, EnumString};

use crate::{DdlError, DdlResult};

/// How a migration is executed against MySQL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DdlStrategy {
    /// Run the statement as-is, synchronously, not managed by the executor.
    Direct,
    /// Managed row-copy + binlog-follow migration.
    Online,
    /// Same execution path as `online`; the canonical managed strategy name.
    Vitess,
    /// Run the statement as-is on the server, managed (tracked, revertible
    /// only for CREATE/DROP).
    MySql,
}

impl DdlStrategy {
    /// Whether this strategy executes via a replication workflow.
    pub fn is_workflow(&self) -> bool {
        matches!(self, DdlStrategy::Online | DdlStrategy::Vitess)
    }
}

const ALLOW_CONCURRENT_FLAG: &str = "allow-concurrent";
const POSTPONE_LAUNCH_FLAG: &str = "postpone-launch";
const POSTPONE_COMPLETION_FLAG: &str = "postpone-completion";
const SINGLETON_FLAG: &str = "singleton";
const SINGLETON_CONTEXT_FLAG: &str = "singleton-context";
const SINGLETON_TABLE_FLAG: &str = "singleton-table";
const IN_ORDER_COMPLETION_FLAG: &str = "in-order-completion";
const ALLOW_ZERO_IN_DATE_FLAG: &str = "allow-zero-in-date";
const ALLOW_FOREIGN_KEYS_FLAG: &str = "unsafe-allow-foreign-keys";
const RETAIN_ARTIFACTS_FLAG: &str = "retain-artifacts";
const CUT_OVER_THRESHOLD_FLAG: &str = "cut-over-threshold";
const FORCE_CUT_OVER_AFTER_FLAG: &str = "force-cut-over-after";
const ANALYZE_TABLE_FLAG: &str = "analyze-table";
const DECLARATIVE_FLAG: &str = "declarative";
const TEST_SUITE_FLAG: &str = "test-suite";

/// A strategy together with its raw options string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategySetting {
    pub strategy: DdlStrategy,
    pub options: String,
}

impl StrategySetting {
    pub fn new(strategy: DdlStrategy, options: impl Into<String>) -> Self {
        Self {
            strategy,
            options: options.into(),
        }
    }

    /// Parses a strategy name and options string. The historical strategy
    /// name `declarative` maps to `online --declarative`.
    pub fn parse(strategy: &str, options: &str) -> DdlResult<Self> {
        if strategy.eq_ignore_ascii_case("declarative") {
            let options = if options.is_empty() {
                format!("--{DECLARATIVE_FLAG}")
            } else {
                format!("{options} --{DECLARATIVE_FLAG}")
            };
            return Ok(Self::new(DdlStrategy::Online, options));
        }
        let strategy = DdlStrategy::from_str(strategy)
            .map_err(|_| DdlError::Invalid(format!("unknown DDL strategy: {strategy}")))?;
        Ok(Self::new(strategy, options))
    }

    fn option_tokens(&self) -> impl Iterator<Item = &str> {
        self.options.split_whitespace()
    }

    /// Whether the given `--flag` is present (with or without a value).
    pub fn has_flag(&self, flag: &str) -> bool {
        self.option_tokens().any(|token| {
            token
                .strip_prefix("--")
                .map(|rest| rest == flag || rest.starts_with(&format!("{flag}=")))
                .unwrap_or(false)
        })
    }

    /// The value of `--flag=value`, unquoted, if present.
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        self.option_tokens().find_map(|token| {
            token
                .strip_prefix("--")?
                .strip_prefix(flag)?
                .strip_prefix('=')
                .map(|v| v.trim_matches('"').trim_matches('\'').to_string())
        })
    }

    pub fn is_allow_concurrent(&self) -> bool {
        self.has_flag(ALLOW_CONCURRENT_FLAG)
    }

    pub fn is_postpone_launch(&self) -> bool {
        self.has_flag(POSTPONE_LAUNCH_FLAG)
    }

    pub fn is_postpone_completion(&self) -> bool {
        self.has_flag(POSTPONE_COMPLETION_FLAG)
    }

    pub fn is_singleton(&self) -> bool {
        self.has_flag(SINGLETON_FLAG) && !self.is_singleton_context() && !self.is_singleton_table()
    }

    pub fn is_singleton_context(&self) -> bool {
        self.has_flag(SINGLETON_CONTEXT_FLAG)
    }

    pub fn is_singleton_table(&self) -> bool {
        self.has_flag(SINGLETON_TABLE_FLAG)
    }

    pub fn is_in_order_completion(&self) -> bool {
        self.has_flag(IN_ORDER_COMPLETION_FLAG)
    }

    pub fn is_allow_zero_in_date(&self) -> bool {
        self.has_flag(ALLOW_ZERO_IN_DATE_FLAG)
    }

    pub fn is_allow_foreign_keys(&self) -> bool {
        self.has_flag(ALLOW_FOREIGN_KEYS_FLAG)
    }

    pub fn is_analyze_table(&self) -> bool {
        self.has_flag(ANALYZE_TABLE_FLAG)
    }

    pub fn is_declarative(&self) -> bool {
        self.has_flag(DECLARATIVE_FLAG)
    }

    /// Whether this migration runs under the end-to-end test suite, which
    /// uses a simplified, non-atomic cut-over.
    pub fn is_test_suite(&self) -> bool {
        self.has_flag(TEST_SUITE_FLAG)
    }

    /// Explicit artifact retention, if requested via `--retain-artifacts`.
    pub fn retain_artifacts_duration(&self) -> DdlResult<Option<Duration>> {
        self.flag_value(RETAIN_ARTIFACTS_FLAG)
            .map(|v| parse_duration(&v))
            .transpose()
    }

    /// Requested cut-over threshold; zero means "use the default".
    pub fn cut_over_threshold(&self) -> DdlResult<Duration> {
        match self.flag_value(CUT_OVER_THRESHOLD_FLAG) {
            Some(v) => parse_duration(&v),
            None => Ok(Duration::ZERO),
        }
    }

    /// Window after which a ready-to-complete migration is forcibly cut
    /// over; zero means "never force".
    pub fn force_cut_over_after(&self) -> DdlResult<Duration> {
        match self.flag_value(FORCE_CUT_OVER_AFTER_FLAG) {
            Some(v) => parse_duration(&v),
            None => Ok(Duration::ZERO),
        }
    }
}

/// Parses a duration literal of the form `150ms`, `10s`, `30m`, `1h` or a
/// combination thereof (`1h30m`). A bare `0` is accepted.
pub fn parse_duration(value: &str) -> DdlResult<Duration> {
    let value = value.trim();
    if value == "0" {
        return Ok(Duration::ZERO);
    }
    if value.is_empty() {
        return Err(DdlError::Invalid("empty duration".to_string()));
    }
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            digits.push(c);
            continue;
        }
        let unit = if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            "ms"
        } else {
            match c {
                's' => "s",
                'm' => "m",
                'h' => "h",
                _ => return Err(DdlError::Invalid(format!("invalid duration: {value}"))),
            }
        };
        let amount: f64 = digits
            .parse()
            .map_err(|_| DdlError::Invalid(format!("invalid duration: {value}")))?;
        digits.clear();
        let unit_ms = match unit {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => unreachable!(),
        };
        total += Duration::from_millis((amount * unit_ms) as u64);
    }
    if !digits.is_empty() {
        return Err(DdlError::Invalid(format!(
            "missing unit in duration: {value}"
        )));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(options: &str) -> StrategySetting {
        StrategySetting::new(DdlStrategy::Vitess, options)
    }

    #[test]
    fn strategy_names_round_trip() {
        for (name, strategy) in [
            ("direct", DdlStrategy::Direct),
            ("online", DdlStrategy::Online),
            ("vitess", DdlStrategy::Vitess),
            ("mysql", DdlStrategy::MySql),
        ] {
            assert_eq!(DdlStrategy::from_str(name).unwrap(), strategy);
            assert_eq!(strategy.to_string(), name);
        }
        assert!(DdlStrategy::from_str("gh-ost").is_err());
    }

    #[test]
    fn declarative_maps_to_online() {
        let setting = StrategySetting::parse("declarative", "").unwrap();
        assert_eq!(setting.strategy, DdlStrategy::Online);
        assert!(setting.is_declarative());
    }

    #[test]
    fn flags() {
        let s = setting("--allow-concurrent --postpone-completion --singleton-table");
        assert!(s.is_allow_concurrent());
        assert!(s.is_postpone_completion());
        assert!(s.is_singleton_table());
        assert!(!s.is_singleton());
        assert!(!s.is_postpone_launch());
        assert!(!s.is_in_order_completion());
    }

    #[test]
    fn singleton_variants_are_mutually_exclusive() {
        assert!(setting("--singleton").is_singleton());
        let ctx = setting("--singleton --singleton-context");
        assert!(!ctx.is_singleton());
        assert!(ctx.is_singleton_context());
    }

    #[test]
    fn flag_values() {
        let s = setting("--cut-over-threshold=15s --retain-artifacts=\"1h\" --force-cut-over-after=90m");
        assert_eq!(s.cut_over_threshold().unwrap(), Duration::from_secs(15));
        assert_eq!(
            s.retain_artifacts_duration().unwrap(),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            s.force_cut_over_after().unwrap(),
            Duration::from_secs(90 * 60)
        );
    }

    #[test]
    fn absent_durations_default_to_zero() {
        let s = setting("--allow-concurrent");
        assert_eq!(s.cut_over_threshold().unwrap(), Duration::ZERO);
        assert_eq!(s.force_cut_over_after().unwrap(), Duration::ZERO);
        assert_eq!(s.retain_artifacts_duration().unwrap(), None);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::from_secs(5400)
        );
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("").is_err());
    }
}
