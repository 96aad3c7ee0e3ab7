//! Retry scenarios.
//!
//! A scenario pairs the status code an endpoint always returns with the
//! retry behavior a conforming exporter must show in response: how many
//! retries, how far apart at minimum, and how long to watch for them.
//!
//! The table is built once at startup, either from [`ScenarioTable::defaults`]
//! or from a TOML file deserialized into [`ScenarioFile`], and handed to the
//! endpoints by value.

use std::{collections::BTreeMap, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tonic::Code;

use crate::error::ScenarioError;

/// Every gRPC status code, in numeric order.
const ALL_CODES: [Code; 17] = [
    Code::Ok,
    Code::Cancelled,
    Code::Unknown,
    Code::InvalidArgument,
    Code::DeadlineExceeded,
    Code::NotFound,
    Code::AlreadyExists,
    Code::PermissionDenied,
    Code::ResourceExhausted,
    Code::FailedPrecondition,
    Code::Aborted,
    Code::OutOfRange,
    Code::Unimplemented,
    Code::Internal,
    Code::Unavailable,
    Code::DataLoss,
    Code::Unauthenticated,
];

/// Codes a conforming exporter must retry.
const RETRYABLE_CODES: [Code; 9] = [
    Code::Cancelled,
    Code::DeadlineExceeded,
    Code::PermissionDenied,
    Code::ResourceExhausted,
    Code::Aborted,
    Code::OutOfRange,
    Code::Unavailable,
    Code::DataLoss,
    Code::Unauthenticated,
];

const DEFAULT_RETRYABLE_COUNT: u32 = 5;
const DEFAULT_RETRYABLE_MIN_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_WINDOW: Duration = Duration::from_secs(30);

/// Longest observation window a scenario may ask for.
pub const MAX_WINDOW_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Returns the numeric value of a status code.
#[must_use]
pub fn code_number(code: Code) -> u16 {
    // Status codes are 0..=16.
    code as i32 as u16
}

/// Returns the snake_case name of a status code (e.g. `deadline_exceeded`).
#[must_use]
pub fn code_name(code: Code) -> String {
    let mut name = String::new();
    for (i, ch) in format!("{code:?}").chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                name.push('_');
            }
            name.push(ch.to_ascii_lowercase());
        } else {
            name.push(ch);
        }
    }
    name
}

/// Parses a status code from its number or its name.
///
/// Names are matched case-insensitively with or without underscores, so
/// `unavailable`, `DEADLINE_EXCEEDED` and `DeadlineExceeded` all parse. The
/// single-l spelling `canceled` is accepted too.
#[must_use]
pub fn parse_code(input: &str) -> Option<Code> {
    let input = input.trim();
    if let Ok(number) = input.parse::<i32>() {
        return ALL_CODES.into_iter().find(|code| *code as i32 == number);
    }
    let wanted: String =
        input.chars().filter(|ch| *ch != '_').map(|ch| ch.to_ascii_lowercase()).collect();
    if wanted == "canceled" {
        return Some(Code::Cancelled);
    }
    ALL_CODES.into_iter().find(|code| format!("{code:?}").to_ascii_lowercase() == wanted)
}

/// One tested status code and the retry behavior expected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    /// Label used in logs and verdicts.
    pub name: String,
    /// Status code the endpoint always answers with.
    pub code: Code,
    /// Exact number of retries expected after the first failed attempt.
    pub expected_retries: u32,
    /// Retries received sooner than this after the first attempt are premature.
    pub min_delay: Duration,
    /// How long a run is observed before it is evaluated.
    pub max_window: Duration,
}

#[bon::bon]
impl Scenario {
    /// Creates a new scenario with validation.
    ///
    /// The name defaults to `RetryTest - {Code} ({number})`.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Validation`] if the code is `OK`, the window
    /// is zero or longer than [`MAX_WINDOW_LIMIT`], or the minimum delay
    /// exceeds the window.
    #[builder]
    pub fn new(
        code: Code,
        #[builder(default)] expected_retries: u32,
        #[builder(default)] min_delay: Duration,
        #[builder(default = DEFAULT_MAX_WINDOW)] max_window: Duration,
        #[builder(into)] name: Option<String>,
    ) -> Result<Self, ScenarioError> {
        let name = name.unwrap_or_else(|| default_name(code));
        let scenario = Self { name, code, expected_retries, min_delay, max_window };
        scenario.validate()?;
        Ok(scenario)
    }

    /// Validates scenario values.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Validation`] on an invalid value.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.code == Code::Ok {
            return Err(ScenarioError::Validation {
                message: format!("{}: status code must not be OK", self.name),
            });
        }
        if self.max_window.is_zero() {
            return Err(ScenarioError::Validation {
                message: format!("{}: max_window must be non-zero", self.name),
            });
        }
        if self.max_window > MAX_WINDOW_LIMIT {
            return Err(ScenarioError::Validation {
                message: format!(
                    "{}: max_window ({}) exceeds the limit of {}",
                    self.name,
                    humantime::format_duration(self.max_window),
                    humantime::format_duration(MAX_WINDOW_LIMIT),
                ),
            });
        }
        if self.min_delay > self.max_window {
            return Err(ScenarioError::Validation {
                message: format!(
                    "{}: min_delay ({}) exceeds max_window ({})",
                    self.name,
                    humantime::format_duration(self.min_delay),
                    humantime::format_duration(self.max_window),
                ),
            });
        }
        Ok(())
    }

    /// Returns the numeric value of the scenario's status code.
    #[must_use]
    pub fn code_number(&self) -> u16 {
        code_number(self.code)
    }
}

fn default_name(code: Code) -> String {
    format!("RetryTest - {code:?} ({})", code_number(code))
}

/// The fixed set of scenarios served by one process, at most one per code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioTable {
    scenarios: Vec<Scenario>,
}

impl ScenarioTable {
    /// Builds a table, ordering scenarios by status code.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Validation`] if the table is empty, a
    /// scenario is invalid, or two scenarios share a status code.
    pub fn new(scenarios: Vec<Scenario>) -> Result<Self, ScenarioError> {
        if scenarios.is_empty() {
            return Err(ScenarioError::Validation {
                message: "scenario table is empty".to_string(),
            });
        }
        let mut by_code = BTreeMap::new();
        for scenario in scenarios {
            scenario.validate()?;
            let number = scenario.code_number();
            if let Some(existing) = by_code.insert(number, scenario) {
                return Err(ScenarioError::Validation {
                    message: format!("duplicate scenario for status code {:?}", existing.code),
                });
            }
        }
        Ok(Self { scenarios: by_code.into_values().collect() })
    }

    /// The built-in table: every non-OK code, retryable ones expecting five
    /// retries at least one second apart, the rest expecting none.
    #[must_use]
    pub fn defaults() -> Self {
        let scenarios = ALL_CODES
            .into_iter()
            .filter(|code| *code != Code::Ok)
            .map(|code| {
                let (expected_retries, min_delay) = if RETRYABLE_CODES.contains(&code) {
                    (DEFAULT_RETRYABLE_COUNT, DEFAULT_RETRYABLE_MIN_DELAY)
                } else {
                    (0, Duration::ZERO)
                };
                Scenario {
                    name: default_name(code),
                    code,
                    expected_retries,
                    min_delay,
                    max_window: DEFAULT_MAX_WINDOW,
                }
            })
            .collect();
        Self { scenarios }
    }

    /// Iterates scenarios in status code order.
    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    /// Returns the scenario for a status code.
    #[must_use]
    pub fn get(&self, code: Code) -> Option<&Scenario> {
        self.scenarios.iter().find(|scenario| scenario.code == code)
    }

    /// Number of scenarios.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Always false for a constructed table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Converts the table into its file representation.
    #[must_use]
    pub fn to_file(&self) -> ScenarioFile {
        ScenarioFile {
            scenarios: self
                .scenarios
                .iter()
                .map(|scenario| ScenarioEntry {
                    code: code_name(scenario.code),
                    expected_retries: scenario.expected_retries,
                    min_delay: scenario.min_delay,
                    max_window: scenario.max_window,
                    name: Some(scenario.name.clone()),
                })
                .collect(),
        }
    }
}

impl TryFrom<ScenarioFile> for ScenarioTable {
    type Error = ScenarioError;

    fn try_from(file: ScenarioFile) -> Result<Self, Self::Error> {
        let scenarios = file
            .scenarios
            .into_iter()
            .map(Scenario::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(scenarios)
    }
}

/// On-disk form of a scenario table.
///
/// ```toml
/// [[scenarios]]
/// code = "unavailable"
/// expected_retries = 5
/// min_delay = "1s"
/// max_window = "30s"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScenarioFile {
    /// One entry per tested status code.
    pub scenarios: Vec<ScenarioEntry>,
}

/// On-disk form of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScenarioEntry {
    /// Status code name (`unavailable`, `deadline_exceeded`, ...) or number.
    #[serde(with = "code_serde")]
    #[schemars(with = "String")]
    pub code: String,
    /// Exact number of retries expected.
    #[serde(default)]
    pub expected_retries: u32,
    /// Minimum delay between the first attempt and any retry.
    #[serde(default, with = "humantime_serde")]
    #[schemars(with = "String")]
    pub min_delay: Duration,
    /// Observation window.
    #[serde(default = "default_max_window", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub max_window: Duration,
    /// Optional label; defaults to `RetryTest - {Code} ({number})`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_max_window() -> Duration {
    DEFAULT_MAX_WINDOW
}

impl TryFrom<ScenarioEntry> for Scenario {
    type Error = ScenarioError;

    fn try_from(entry: ScenarioEntry) -> Result<Self, Self::Error> {
        let code = parse_code(&entry.code).ok_or_else(|| ScenarioError::Validation {
            message: format!("unknown status code '{}'", entry.code),
        })?;
        Scenario::builder()
            .code(code)
            .expected_retries(entry.expected_retries)
            .min_delay(entry.min_delay)
            .max_window(entry.max_window)
            .maybe_name(entry.name)
            .build()
    }
}

/// Status codes may be written as names or bare numbers in TOML.
mod code_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NameOrNumber {
        Name(String),
        Number(i64),
    }

    pub fn serialize<S>(code: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(code)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match NameOrNumber::deserialize(deserializer)? {
            NameOrNumber::Name(name) => name,
            NameOrNumber::Number(number) => number.to_string(),
        })
    }
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
