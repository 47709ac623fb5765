//! Job naming rules and execution identifiers
//!
//! Job names end up as a fragment of the execution instance's name on the
//! backend, so they are restricted to what a DNS label accepts. An execution
//! id is `<job name>-<build id>`; with the limits below it always fits in a
//! single 63 character label.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Maximum length of a job name, in bytes.
pub const MAX_JOB_NAME_LENGTH: usize = 36;

/// Length of a generated build id.
pub const BUILD_ID_LENGTH: usize = 26;

/// Maximum length of an execution id (`name` + `-` + build id).
pub const MAX_EXECUTION_ID_LENGTH: usize = MAX_JOB_NAME_LENGTH + 1 + BUILD_ID_LENGTH;

/// Returns `true` if `name` can be used as a job name
pub fn is_valid_name(name: &str) -> bool {
    validate_name(name).is_ok()
}

/// Checks a job name and reports the first rule it breaks
///
/// Names must be non-empty, at most [`MAX_JOB_NAME_LENGTH`] bytes, made of
/// lowercase ASCII letters, digits and hyphens, and must not start or end
/// with a hyphen.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }

    if name.len() > MAX_JOB_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            len: name.len(),
            max: MAX_JOB_NAME_LENGTH,
        });
    }

    if let Some((index, ch)) = name.char_indices().find(|(_, c)| !is_label_char(*c)) {
        return Err(ValidationError::InvalidCharacter { ch, index });
    }

    if name.starts_with('-') {
        return Err(ValidationError::LeadingHyphen);
    }

    if name.ends_with('-') {
        return Err(ValidationError::TrailingHyphen);
    }

    Ok(())
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

/// Identifier of one pipeline run
///
/// Shared by every job in the run. Keys the build-wide shared storage area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildId(String);

impl BuildId {
    /// Generates a fresh random build id
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(simple[..BUILD_ID_LENGTH].to_string())
    }

    /// Parses an externally supplied build id
    ///
    /// Accepts 1 to [`BUILD_ID_LENGTH`] lowercase alphanumerics.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if value.is_empty() {
            return Err(ValidationError::Empty);
        }
        if value.len() > BUILD_ID_LENGTH {
            return Err(ValidationError::TooLong {
                len: value.len(),
                max: BUILD_ID_LENGTH,
            });
        }
        if let Some((index, ch)) = value
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        {
            return Err(ValidationError::InvalidCharacter { ch, index });
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BuildId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BuildId> for String {
    fn from(id: BuildId) -> Self {
        id.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addressable name of one execution instance on the backend
///
/// Generated by the runner, never supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Builds the execution id for a job within a build
    ///
    /// The job name is expected to have passed [`validate_name`].
    pub fn new(job_name: &str, build_id: &BuildId) -> Self {
        Self(format!("{}-{}", job_name, build_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
