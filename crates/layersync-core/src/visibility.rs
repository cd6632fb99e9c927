//! Visibility state and the result records produced by verification.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SyncError;
use crate::renderer::PropertyValue;

/// Layer visibility as the renderer spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    None,
}

impl Visibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::None => "none",
        }
    }

    #[must_use]
    pub fn to_property_value(self) -> PropertyValue {
        PropertyValue::String(self.as_str().to_string())
    }

    /// Interpret a raw property read.
    ///
    /// Unset reads as `Visible`, the renderer's own default. Anything
    /// unrecognised also reads as `Visible` and is logged.
    #[must_use]
    pub fn from_property(layer_id: &str, value: Option<&PropertyValue>) -> Self {
        match value {
            None | Some(PropertyValue::Null) => Self::Visible,
            Some(PropertyValue::String(s)) if s == "visible" => Self::Visible,
            Some(PropertyValue::String(s)) if s == "none" => Self::None,
            Some(other) => {
                warn!(
                    layer_id,
                    value = %other,
                    "Unexpected visibility value, treating as visible"
                );
                Self::Visible
            }
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two canonical display modes of the themed layer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorScheme {
    /// Themed overlay shown.
    Themed,
    /// Themed overlay hidden.
    Standard,
}

impl ColorScheme {
    /// Visibility every themed layer should converge to under this scheme.
    #[must_use]
    pub fn target_visibility(self) -> Visibility {
        match self {
            Self::Themed => Visibility::Visible,
            Self::Standard => Visibility::None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Themed => "themed",
            Self::Standard => "standard",
        }
    }
}

impl fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one verification (or one retried mutation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub layer_id: String,
    pub expected: Visibility,
    /// Last observed state; `Some` whenever the layer existed when read.
    pub actual: Option<Visibility>,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<SyncError>,
}

impl VerificationResult {
    #[must_use]
    pub fn converged(layer_id: impl Into<String>, state: Visibility, duration: Duration) -> Self {
        Self {
            layer_id: layer_id.into(),
            expected: state,
            actual: Some(state),
            duration,
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(
        layer_id: impl Into<String>,
        expected: Visibility,
        actual: Option<Visibility>,
        duration: Duration,
        error: SyncError,
    ) -> Self {
        Self {
            layer_id: layer_id.into(),
            expected,
            actual,
            duration,
            success: false,
            error: Some(error),
        }
    }

    /// Error text, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Aggregate of many verifications issued for one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    /// Member results, in declaration order.
    pub results: Vec<VerificationResult>,
    pub total_duration: Duration,
    pub success_count: usize,
    pub failure_count: usize,
    pub context: String,
    /// Failure that prevented any member from running.
    pub error: Option<SyncError>,
}

impl BatchResult {
    /// Aggregate member results.
    #[must_use]
    pub fn from_results(
        results: Vec<VerificationResult>,
        total_duration: Duration,
        context: impl Into<String>,
    ) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = results.len() - success_count;
        Self {
            success: failure_count == 0,
            results,
            total_duration,
            success_count,
            failure_count,
            context: context.into(),
            error: None,
        }
    }

    /// The renderer handle was missing: zero results, one synthetic failure.
    #[must_use]
    pub fn unavailable(context: impl Into<String>) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            total_duration: Duration::ZERO,
            success_count: 0,
            failure_count: 1,
            context: context.into(),
            error: Some(SyncError::Unavailable),
        }
    }

    /// Results that did not succeed.
    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.success)
    }
}
