//! Device identifier templates.
//!
//! A template names every device of a batch from a single string:
//!
//! ```text
//! `sensor-`00A0${increment(250)}   -> sensor-A0, sensor-A1, ... (250 names)
//! `gw-`${list}north,south,east     -> gw-NORTH, gw-SOUTH, gw-EAST
//! `lab-`${static}bench             -> lab-BENCH for every index
//! plain-name                       -> PLAIN-NAME for every index
//! ```
//!
//! The backticked part is the prefix (kept verbatim), `${...}` picks the
//! generator and the remaining text is its base value. The identifier is
//! base64-encoded into the CSR Common Name, which caps it at
//! [`MAX_ENCODED_COMMON_NAME`] characters once encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{CertError, Result};

/// Upper bound on the base64-encoded identifier (X.520 CN limit).
pub const MAX_ENCODED_COMMON_NAME: usize = 64;

/// How identifiers vary with the device index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generator {
    /// Hexadecimal counter starting at `commonNameStart`
    Increment,
    /// One entry of `commonNameList` per device
    List,
    /// Same identifier for every device
    Static,
}

impl std::str::FromStr for Generator {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "increment" => Ok(Self::Increment),
            "list" => Ok(Self::List),
            "static" => Ok(Self::Static),
            other => Err(CertError::invalid(format!(
                "unknown common name generator '{other}'"
            ))),
        }
    }
}

/// Parsed identifier template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonNameSpec {
    /// Generator kind
    pub generator: Generator,

    /// Prepended verbatim to every identifier
    #[serde(default)]
    pub prefix: String,

    /// Hex start value for `increment`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name_start: Option<String>,

    /// Names for `list`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name_list: Option<Vec<String>>,

    /// Name for `static`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name_static: Option<String>,

    /// Count embedded in the template (`increment(n)`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
}

impl CommonNameSpec {
    /// A `static` spec naming every device `value`.
    pub fn fixed(value: impl Into<String>) -> Self {
        Self {
            generator: Generator::Static,
            prefix: String::new(),
            common_name_start: None,
            common_name_list: None,
            common_name_static: Some(value.into()),
            quantity: None,
        }
    }

    /// Parse a template string.
    ///
    /// A string with neither a backticked prefix nor a `${...}` marker is
    /// taken as a static name.
    pub fn parse(template: &str) -> Result<Self> {
        let tokens = tokenize(template)?;

        let mut prefix: Option<&str> = None;
        let mut generator: Option<(&str, Option<&str>)> = None;
        let mut base = String::new();

        for token in tokens {
            match token {
                Token::Prefix(p) => {
                    if prefix.replace(p).is_some() {
                        return Err(CertError::invalid("template has more than one prefix"));
                    }
                }
                Token::Generator { keyword, argument } => {
                    if generator.replace((keyword, argument)).is_some() {
                        return Err(CertError::invalid("template has more than one generator"));
                    }
                }
                Token::Text(text) => base.push_str(text),
            }
        }

        if prefix.is_none() && generator.is_none() {
            return Ok(Self::fixed(template));
        }

        let mut spec = Self::fixed(base.trim());
        spec.prefix = prefix.unwrap_or_default().to_string();

        let Some((keyword, argument)) = generator else {
            return Ok(spec);
        };

        spec.generator = keyword.parse()?;
        spec.common_name_static = None;
        let base = base.trim();

        match spec.generator {
            Generator::Increment => {
                spec.common_name_start = Some(base.to_string());
                spec.quantity = argument
                    .map(|arg| {
                        arg.parse::<u64>().map_err(|_| {
                            CertError::invalid(format!("increment count '{arg}' is not a number"))
                        })
                    })
                    .transpose()?;
            }
            Generator::List => {
                if argument.is_some() {
                    return Err(CertError::invalid("list generator takes no argument"));
                }
                let names: Vec<String> = base
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(String::from)
                    .collect();
                spec.quantity = Some(names.len() as u64);
                spec.common_name_list = Some(names);
            }
            Generator::Static => {
                if argument.is_some() {
                    return Err(CertError::invalid("static generator takes no argument"));
                }
                spec.common_name_static = Some(base.to_string());
            }
        }

        Ok(spec)
    }

    /// Check the fields the generator needs.
    pub fn validate(&self) -> Result<()> {
        match self.generator {
            Generator::Increment => {
                let start = self.common_name_start.as_deref().unwrap_or_default();
                if start.is_empty() || !start.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(CertError::invalid(
                        "increment generator requires a hexadecimal commonNameStart",
                    ));
                }
                if self.quantity == Some(0) {
                    return Err(CertError::invalid("increment count must be positive"));
                }
            }
            Generator::List => {
                if self.common_name_list.as_ref().map_or(true, Vec::is_empty) {
                    return Err(CertError::invalid(
                        "list generator requires a non-empty commonNameList",
                    ));
                }
            }
            Generator::Static => {
                if self.common_name_static.as_deref().map_or(true, str::is_empty) {
                    return Err(CertError::invalid(
                        "static generator requires a non-empty commonNameStatic",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Device count implied by the template itself, if any.
    ///
    /// Lists always define it; `increment(n)` defines it when `n` is given.
    #[must_use]
    pub fn effective_quantity(&self) -> Option<u64> {
        match self.generator {
            Generator::List => self.common_name_list.as_ref().map(|l| l.len() as u64),
            Generator::Increment => self.quantity,
            Generator::Static => None,
        }
    }

    /// Identifier of the device at `index` (0-based, across the whole task).
    pub fn resolve(&self, index: u64) -> Result<String> {
        let body = match self.generator {
            Generator::Increment => {
                let start = self
                    .common_name_start
                    .as_deref()
                    .ok_or_else(|| CertError::invalid("missing commonNameStart"))?;
                hex_add(start, index)?
            }
            Generator::List => {
                let list = self
                    .common_name_list
                    .as_ref()
                    .ok_or_else(|| CertError::invalid("missing commonNameList"))?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| list.get(i))
                    .ok_or_else(|| {
                        CertError::invalid(format!(
                            "index {index} out of range for a list of {}",
                            list.len()
                        ))
                    })?
                    .to_uppercase()
            }
            Generator::Static => self
                .common_name_static
                .as_deref()
                .ok_or_else(|| CertError::invalid("missing commonNameStatic"))?
                .to_uppercase(),
        };

        Ok(format!("{}{body}", self.prefix))
    }

    /// Reject specs whose longest identifier would not fit the CSR.
    ///
    /// Identifier length never decreases with the index, so the last
    /// index is the worst case.
    pub fn check_encoded_length(&self, quantity: u64) -> Result<()> {
        if quantity == 0 {
            return Err(CertError::invalid("quantity must be positive"));
        }
        let last = self.resolve(quantity - 1)?;
        let encoded = encode_identifier(&last);
        if encoded.len() > MAX_ENCODED_COMMON_NAME {
            return Err(CertError::invalid(format!(
                "common name '{last}' is {} characters once encoded, limit is {MAX_ENCODED_COMMON_NAME}",
                encoded.len()
            )));
        }
        Ok(())
    }
}

/// Base64 form placed in the CSR Common Name.
#[must_use]
pub fn encode_identifier(identifier: &str) -> String {
    STANDARD.encode(identifier.as_bytes())
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Prefix(&'a str),
    Generator {
        keyword: &'a str,
        argument: Option<&'a str>,
    },
    Text(&'a str),
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('`') {
            let end = after
                .find('`')
                .ok_or_else(|| CertError::invalid("unterminated prefix, missing closing '`'"))?;
            tokens.push(Token::Prefix(&after[..end]));
            rest = &after[end + 1..];
        } else if let Some(after) = rest.strip_prefix("${") {
            let end = after
                .find('}')
                .ok_or_else(|| CertError::invalid("unterminated generator, missing closing '}'"))?;
            tokens.push(generator_token(&after[..end])?);
            rest = &after[end + 1..];
        } else {
            let end = [rest.find('`'), rest.find("${")]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or(rest.len());
            tokens.push(Token::Text(&rest[..end]));
            rest = &rest[end..];
        }
    }

    Ok(tokens)
}

fn generator_token(body: &str) -> Result<Token<'_>> {
    let body = body.trim();
    let Some(open) = body.find('(') else {
        return Ok(Token::Generator {
            keyword: body,
            argument: None,
        });
    };

    let argument = body[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| CertError::invalid(format!("malformed generator '{body}'")))?
        .trim();

    Ok(Token::Generator {
        keyword: body[..open].trim(),
        argument: (!argument.is_empty()).then_some(argument),
    })
}

/// `start + offset` in uppercase hex, any length, no leading zeros.
fn hex_add(start: &str, offset: u64) -> Result<String> {
    let mut digits = start
        .chars()
        .map(|c| {
            c.to_digit(16)
                .ok_or_else(|| CertError::invalid(format!("'{start}' is not hexadecimal")))
        })
        .collect::<Result<Vec<u32>>>()?;

    let mut carry = offset;
    for digit in digits.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let total = u64::from(*digit) + carry % 16;
        carry = carry / 16 + total / 16;
        *digit = (total % 16) as u32;
    }
    while carry > 0 {
        digits.insert(0, (carry % 16) as u32);
        carry /= 16;
    }

    let first = digits.iter().position(|d| *d != 0).unwrap_or(digits.len().saturating_sub(1));
    Ok(digits[first..]
        .iter()
        .filter_map(|d| char::from_digit(*d, 16))
        .map(|c| c.to_ascii_uppercase())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_increment_with_count() {
        let spec = CommonNameSpec::parse("`unit-test::`AB1CD79EF1${increment(115)}").unwrap();
        assert_eq!(spec.generator, Generator::Increment);
        assert_eq!(spec.prefix, "unit-test::");
        assert_eq!(spec.common_name_start.as_deref(), Some("AB1CD79EF1"));
        assert_eq!(spec.quantity, Some(115));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_parse_generator_before_base() {
        let spec = CommonNameSpec::parse("`dev-`${increment}0F").unwrap();
        assert_eq!(spec.common_name_start.as_deref(), Some("0F"));
        assert_eq!(spec.quantity, None);
        assert_eq!(spec.resolve(1).unwrap(), "dev-10");
    }

    #[test]
    fn test_parse_plain_value_is_static() {
        let spec = CommonNameSpec::parse("gateway-7").unwrap();
        assert_eq!(spec.generator, Generator::Static);
        assert_eq!(spec.prefix, "");
        assert_eq!(spec.resolve(42).unwrap(), "GATEWAY-7");
    }

    #[test]
    fn test_parse_list() {
        let spec = CommonNameSpec::parse("`gw-`${list}north, south,east").unwrap();
        assert_eq!(spec.generator, Generator::List);
        assert_eq!(spec.effective_quantity(), Some(3));
        assert_eq!(spec.resolve(1).unwrap(), "gw-SOUTH");
        assert!(spec.resolve(3).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(CommonNameSpec::parse("`open-prefix${increment}00").is_err());
        assert!(CommonNameSpec::parse("`p`00${increment(1)").is_err());
        assert!(CommonNameSpec::parse("`p`00${increment(abc)}").is_err());
        assert!(CommonNameSpec::parse("`p`00${random}").is_err());
        assert!(CommonNameSpec::parse("`a``b`00${increment}").is_err());
        assert!(CommonNameSpec::parse("`p`a,b${list(2)}").is_err());
    }

    #[test]
    fn test_validate_requires_generator_fields() {
        let spec = CommonNameSpec::parse("`p`XYZ${increment(5)}").unwrap();
        assert!(spec.validate().is_err());

        let spec = CommonNameSpec::parse("`p`${list}").unwrap();
        assert!(spec.validate().is_err());

        let spec = CommonNameSpec::parse("`p`${static}").unwrap();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_increment_resolution() {
        let spec = CommonNameSpec::parse("`unit-test::`AB1CD79EF1${increment(115)}").unwrap();
        assert_eq!(spec.resolve(0).unwrap(), "unit-test::AB1CD79EF1");
        assert_eq!(spec.resolve(114).unwrap(), "unit-test::AB1CD79F63");
    }

    #[test]
    fn test_increment_drops_leading_zeros_and_grows() {
        let spec = CommonNameSpec::parse("00FF${increment}").unwrap();
        assert_eq!(spec.resolve(0).unwrap(), "FF");
        assert_eq!(spec.resolve(1).unwrap(), "100");

        let mut last = 0;
        for i in 0..600 {
            let len = spec.resolve(i).unwrap().len();
            assert!(len >= last);
            last = len;
        }
    }

    #[test]
    fn test_increment_beyond_u64() {
        let start = "FFFFFFFFFFFFFFFFFFFF";
        assert_eq!(hex_add(start, 1).unwrap(), "100000000000000000000");
        assert_eq!(hex_add("0", u64::MAX).unwrap(), "FFFFFFFFFFFFFFFF");
        assert_eq!(hex_add("000", 0).unwrap(), "0");
    }

    #[test]
    fn test_encoded_length_bound() {
        let ok = CommonNameSpec::parse("`unit-test::`AB1CD79EF1${increment(115)}").unwrap();
        assert!(ok.check_encoded_length(115).is_ok());

        let too_long = CommonNameSpec::parse(
            "`unit-test::`AB1CD79EF1AB1CD79EF1AB1CD79EF1AB1CD79EF1${increment(5)}",
        )
        .unwrap();
        assert!(matches!(
            too_long.check_encoded_length(5),
            Err(CertError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_encode_identifier() {
        assert_eq!(encode_identifier("DEV-01"), "REVWLTAx");
    }
}
