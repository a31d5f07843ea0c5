use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// One record of an item's stream, ordered by `number`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub number: i64,
    pub value: String,
}

impl Line {
    #[must_use]
    pub fn new(number: i64, value: impl Into<String>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }
}

/// Syslog severity attached to a log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[default]
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "EMERGENCY",
            Self::Alert => "ALERT",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EMERGENCY" => Ok(Self::Emergency),
            "ALERT" => Ok(Self::Alert),
            "CRITICAL" => Ok(Self::Critical),
            "ERROR" => Ok(Self::Error),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "NOTICE" => Ok(Self::Notice),
            "INFO" => Ok(Self::Info),
            "DEBUG" => Ok(Self::Debug),
            other => Err(Error::InvalidInput(format!("Unknown log level: {other}"))),
        }
    }
}

/// Render a message the way it is stored and served: `"[LEVEL] text\n"`.
///
/// Trailing newlines on `text` are collapsed so every stored line ends with
/// exactly one.
#[must_use]
pub fn format_line(level: LogLevel, text: &str) -> String {
    format!("[{level}] {}\n", text.trim_end_matches('\n'))
}
