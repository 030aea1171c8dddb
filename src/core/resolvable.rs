//! Provides and requires expressions
//!
//! A [`Resolvable`] is what a package provides (`name [= version [compat >= v]]`),
//! a [`ResolvableExpression`] is what a package requires
//! (`name [op version] [base]`).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::version::version_compare;

// HPKG:   <name> [ "=" <version> [ "(compatible >= " <version> ")" ]]
// Recipe: <name> [ "=" <version> [ "compat >= " <version> ]]
const PROVIDES_PATTERN: &str =
    r"^([^\s=]+)\s*(=\s*([^\s]+)\s*((\(compatible|compat)\s*>=\s*([^\s)]+))?)?";

const REQUIRES_PATTERN: &str = r"^([^\s=!<>]+)\s*([=!<>]+)?\s*([^\s]+)?";

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Result<&'static Regex, String> {
    cell.get_or_init(|| Regex::new(source).ok())
        .as_ref()
        .ok_or_else(|| format!("invalid pattern '{source}'"))
}

/// Version comparison operator of a requires expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>=`
    GreaterOrEqual,
    /// `>`
    Greater,
}

impl Operator {
    /// Whether a comparison result of `provided` vs `required` satisfies this operator
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Less => ordering == Ordering::Less,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::Equal => ordering == Ordering::Equal,
            Self::NotEqual => ordering != Ordering::Equal,
            Self::GreaterOrEqual => ordering != Ordering::Less,
            Self::Greater => ordering == Ordering::Greater,
        }
    }

    /// Operator token
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterOrEqual => ">=",
            Self::Greater => ">",
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(Self::Less),
            "<=" => Ok(Self::LessOrEqual),
            "==" | "=" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            ">=" => Ok(Self::GreaterOrEqual),
            ">" => Ok(Self::Greater),
            other => Err(format!("unknown operator '{other}'")),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something a package provides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolvable {
    /// Provided name, e.g. `libfoo` or `cmd:foo`
    pub name: String,
    /// Provided version
    pub version: Option<String>,
    /// Oldest version this provides is backwards compatible with
    pub compatible_version: Option<String>,
}

impl Resolvable {
    /// Provides with a name only
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            compatible_version: None,
        }
    }

    /// Provides with name and version
    pub fn versioned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
            compatible_version: None,
        }
    }

    /// Set the compatible version floor
    #[must_use]
    pub fn with_compatible_version(mut self, version: impl Into<String>) -> Self {
        self.compatible_version = Some(version.into());
        self
    }

    /// Whether this provides satisfies the given requires
    ///
    /// Only name, operator and compatibility are considered here; the `base`
    /// qualifier depends on where the provides comes from and is handled by
    /// the provides index.
    pub fn satisfies(&self, requires: &ResolvableExpression) -> bool {
        if self.name != requires.name {
            return false;
        }

        let (Some(operator), Some(required)) = (requires.operator, requires.version.as_deref())
        else {
            return true;
        };

        let Some(provided) = self.version.as_deref() else {
            return false;
        };

        if !operator.accepts(version_compare(provided, required)) {
            return false;
        }

        match self.compatible_version.as_deref() {
            Some(compatible) => version_compare(compatible, required) != Ordering::Greater,
            None => true,
        }
    }
}

impl FromStr for Resolvable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static CELL: OnceLock<Option<Regex>> = OnceLock::new();
        let re = pattern(&CELL, PROVIDES_PATTERN)?;
        let caps = re
            .captures(s.trim())
            .ok_or_else(|| format!("invalid provides '{s}'"))?;

        Ok(Self {
            name: caps[1].to_string(),
            version: caps.get(3).map(|m| m.as_str().to_string()),
            compatible_version: caps.get(6).map(|m| m.as_str().to_string()),
        })
    }
}

impl TryFrom<String> for Resolvable {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolvable> for String {
    fn from(value: Resolvable) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Resolvable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(version) = &self.version {
            write!(f, " = {version}")?;
        }
        if let Some(compatible) = &self.compatible_version {
            write!(f, " (compatible >= {compatible})")?;
        }
        Ok(())
    }
}

/// Something a package requires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResolvableExpression {
    /// Required name
    pub name: String,
    /// Comparison operator, absent for name-only requires
    pub operator: Option<Operator>,
    /// Version the operator compares against
    pub version: Option<String>,
    /// Weaker requirement that must not be satisfied by a built artifact
    pub base: bool,
}

impl ResolvableExpression {
    /// Requires on a name only
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operator: None,
            version: None,
            base: false,
        }
    }

    /// Requires with an operator and version
    pub fn with_version(name: impl Into<String>, operator: Operator, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operator: Some(operator),
            version: Some(version.into()),
            base: false,
        }
    }

    /// Parse, optionally dropping a trailing `base` qualifier
    pub fn parse(s: &str, ignore_base: bool) -> Result<Self, String> {
        static CELL: OnceLock<Option<Regex>> = OnceLock::new();
        let re = pattern(&CELL, REQUIRES_PATTERN)?;
        let trimmed = s.trim();
        let caps = re
            .captures(trimmed)
            .ok_or_else(|| format!("invalid requires '{s}'"))?;

        let operator = caps
            .get(2)
            .map(|m| m.as_str().parse::<Operator>())
            .transpose()?;
        let version = caps.get(3).map(|m| m.as_str().to_string());
        if operator.is_some() && version.is_none() {
            return Err(format!("requires '{s}' has an operator but no version"));
        }

        Ok(Self {
            name: caps[1].to_string(),
            operator,
            version: if operator.is_some() { version } else { None },
            base: !ignore_base && trimmed.ends_with(" base"),
        })
    }
}

impl FromStr for ResolvableExpression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, false)
    }
}

impl TryFrom<String> for ResolvableExpression {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value, false)
    }
}

impl From<ResolvableExpression> for String {
    fn from(value: ResolvableExpression) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ResolvableExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let (Some(operator), Some(version)) = (self.operator, &self.version) {
            write!(f, " {operator} {version}")?;
        }
        if self.base {
            f.write_str(" base")?;
        }
        Ok(())
    }
}
