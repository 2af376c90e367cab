use serde::{Deserialize, Serialize};

use crate::error::{CertError, Result};
use crate::naming::CommonNameSpec;

/// Longest validity we will issue, in days
pub const MAX_DAYS_EXPIRY: u32 = 825;

/// Subject attributes placed in every CSR of a task.
///
/// The same shape doubles as the environment-level defaults that fill
/// in whatever a request leaves unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectFields {
    /// O
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    /// OU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizational_unit: Option<String>,

    /// L
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,

    /// ST
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// C, exactly two characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    /// emailAddress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// dnQualifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dn_qualifier: Option<String>,
}

impl SubjectFields {
    /// Fill every unset field from `defaults`.
    #[must_use]
    pub fn merged_with(self, defaults: &Self) -> Self {
        Self {
            organization: self.organization.or_else(|| defaults.organization.clone()),
            organizational_unit: self
                .organizational_unit
                .or_else(|| defaults.organizational_unit.clone()),
            locality: self.locality.or_else(|| defaults.locality.clone()),
            state: self.state.or_else(|| defaults.state.clone()),
            country: self.country.or_else(|| defaults.country.clone()),
            email: self.email.or_else(|| defaults.email.clone()),
            dn_qualifier: self.dn_qualifier.or_else(|| defaults.dn_qualifier.clone()),
        }
    }

    /// Check the country code length.
    pub fn validate(&self) -> Result<()> {
        if let Some(country) = &self.country {
            if country.chars().count() != 2 {
                return Err(CertError::invalid(format!(
                    "country must be exactly 2 characters, got '{country}'"
                )));
            }
        }
        Ok(())
    }
}

/// The device identifier template, either as written by the user or
/// already parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommonNameInput {
    /// Parsed template
    Spec(CommonNameSpec),
    /// Raw template string, e.g. `` `dev-`00A0${increment(100)} ``
    Template(String),
}

impl CommonNameInput {
    /// Parse (if needed) and validate into a spec.
    pub fn to_spec(&self) -> Result<CommonNameSpec> {
        let spec = match self {
            Self::Spec(spec) => spec.clone(),
            Self::Template(template) => CommonNameSpec::parse(template)?,
        };
        spec.validate()?;
        Ok(spec)
    }
}

impl From<CommonNameSpec> for CommonNameInput {
    fn from(spec: CommonNameSpec) -> Self {
        Self::Spec(spec)
    }
}

impl From<&str> for CommonNameInput {
    fn from(template: &str) -> Self {
        Self::Template(template.to_string())
    }
}

/// Everything needed to build the CSRs of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    /// Subject attributes
    #[serde(flatten)]
    pub subject: SubjectFields,

    /// Validity in days, 1..=825
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_expiry: Option<u32>,

    /// Append the issuing CA certificate to each certificate PEM
    #[serde(default, rename = "includeCA")]
    pub include_ca: bool,

    /// Device identifier template
    pub common_name: CommonNameInput,
}

impl CertificateInfo {
    /// Minimal info with only a naming template.
    pub fn new(common_name: impl Into<CommonNameInput>) -> Self {
        Self {
            subject: SubjectFields::default(),
            days_expiry: None,
            include_ca: false,
            common_name: common_name.into(),
        }
    }

    /// Check expiry range and subject fields.
    pub fn validate(&self) -> Result<()> {
        if let Some(days) = self.days_expiry {
            if days == 0 || days > MAX_DAYS_EXPIRY {
                return Err(CertError::invalid(format!(
                    "daysExpiry must be between 1 and {MAX_DAYS_EXPIRY}, got {days}"
                )));
            }
        }
        self.subject.validate()
    }
}
