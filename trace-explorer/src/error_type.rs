use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Severity of the errors seen in a trace, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    #[default]
    None,
    Transient,
    Critical,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::None => "none",
            ErrorType::Transient => "transient",
            ErrorType::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "transient" => Ok(Self::Transient),
            "critical" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

pub trait ErrorClassifier {
    /// Returns the error type after looking at `span`. Callers never let the
    /// result go below `current`.
    fn classify(&self, span: &Span, current: ErrorType) -> ErrorType;
}

/// An `error` tag is critical, an `error` annotation is transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagAndAnnotationClassifier;

impl ErrorClassifier for TagAndAnnotationClassifier {
    fn classify(&self, span: &Span, current: ErrorType) -> ErrorType {
        if current == ErrorType::Critical {
            return current;
        }
        if span.tags.contains_key("error") {
            ErrorType::Critical
        } else if span.annotations.iter().any(|a| a.value == "error") {
            ErrorType::Transient
        } else {
            current
        }
    }
}

impl<F> ErrorClassifier for F
where
    F: Fn(&Span, ErrorType) -> ErrorType,
{
    fn classify(&self, span: &Span, current: ErrorType) -> ErrorType {
        self(span, current)
    }
}
