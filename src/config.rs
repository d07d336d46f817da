use std::{fmt, num::NonZeroUsize, str::FromStr};

use crate::ConfigurationError;

/// The maximum number of work items allowed to run at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawConcurrency"))]
pub enum Concurrency {
    Limited(NonZeroUsize),
    Unbounded,
}

/// Configuration for a [Limiter](crate::Limiter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LimiterConfig {
    pub concurrency: Concurrency,
}

impl Concurrency {
    /// One work item at a time.
    pub const SERIAL: Self = Self::Limited(NonZeroUsize::MIN);

    /// The limit, or `None` if unbounded.
    pub fn get(self) -> Option<usize> {
        match self {
            Self::Limited(n) => Some(n.get()),
            Self::Unbounded => None,
        }
    }

    pub(crate) fn is_reached_by(self, in_flight: usize) -> bool {
        match self {
            Self::Limited(n) => in_flight >= n.get(),
            Self::Unbounded => false,
        }
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::SERIAL
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::default(),
        }
    }
}

impl From<NonZeroUsize> for Concurrency {
    fn from(n: NonZeroUsize) -> Self {
        Self::Limited(n)
    }
}

impl TryFrom<usize> for Concurrency {
    type Error = ConfigurationError;

    fn try_from(n: usize) -> Result<Self, Self::Error> {
        NonZeroUsize::new(n)
            .map(Self::Limited)
            .ok_or(ConfigurationError::NotPositive)
    }
}

impl TryFrom<f64> for Concurrency {
    type Error = ConfigurationError;

    fn try_from(n: f64) -> Result<Self, Self::Error> {
        if n.is_nan() {
            return Err(ConfigurationError::NotANumber(n.to_string()));
        }
        if n <= 0.0 {
            return Err(ConfigurationError::NotPositive);
        }
        if n == f64::INFINITY {
            return Ok(Self::Unbounded);
        }
        if n.fract() != 0.0 {
            return Err(ConfigurationError::Fractional(n));
        }
        // Anything larger than usize::MAX can never be reached anyway.
        if n >= usize::MAX as f64 {
            return Ok(Self::Unbounded);
        }
        Self::try_from(n as usize)
    }
}

impl FromStr for Concurrency {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "inf" | "infinity" | "unbounded" => return Ok(Self::Unbounded),
            _ => {}
        }
        let n: f64 = s
            .parse()
            .map_err(|_| ConfigurationError::NotANumber(s.to_owned()))?;
        Self::try_from(n)
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{n}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RawConcurrency {
    Number(f64),
    Text(String),
}

#[cfg(feature = "serde")]
impl TryFrom<RawConcurrency> for Concurrency {
    type Error = ConfigurationError;

    fn try_from(raw: RawConcurrency) -> Result<Self, Self::Error> {
        match raw {
            RawConcurrency::Number(n) => Self::try_from(n),
            RawConcurrency::Text(s) => s.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serial() {
        assert_eq!(LimiterConfig::default().concurrency.get(), Some(1));
    }

    #[test]
    fn rejects_non_positive() {
        assert_eq!(Concurrency::try_from(0usize), Err(ConfigurationError::NotPositive));
        assert_eq!(Concurrency::try_from(0.0), Err(ConfigurationError::NotPositive));
        assert_eq!(Concurrency::try_from(-1.0), Err(ConfigurationError::NotPositive));
        assert_eq!(
            Concurrency::try_from(f64::NEG_INFINITY),
            Err(ConfigurationError::NotPositive)
        );
    }

    #[test]
    fn rejects_non_numbers() {
        assert!(matches!(
            Concurrency::try_from(f64::NAN),
            Err(ConfigurationError::NotANumber(_))
        ));
        assert_eq!(
            "a".parse::<Concurrency>(),
            Err(ConfigurationError::NotANumber("a".to_owned()))
        );
        assert_eq!(
            Concurrency::try_from(1.5),
            Err(ConfigurationError::Fractional(1.5))
        );
    }

    #[test]
    fn infinity_is_unbounded() {
        assert_eq!(Concurrency::try_from(f64::INFINITY), Ok(Concurrency::Unbounded));
        assert_eq!("Infinity".parse::<Concurrency>(), Ok(Concurrency::Unbounded));
        assert_eq!("unbounded".parse::<Concurrency>(), Ok(Concurrency::Unbounded));
        assert_eq!(Concurrency::Unbounded.get(), None);
        assert!(!Concurrency::Unbounded.is_reached_by(usize::MAX));
    }

    #[test]
    fn parses_whole_numbers() {
        assert_eq!(" 4 ".parse::<Concurrency>().unwrap().get(), Some(4));
        assert_eq!(Concurrency::try_from(3.0).unwrap().get(), Some(3));
        assert!(Concurrency::SERIAL.is_reached_by(1));
        assert!(!Concurrency::SERIAL.is_reached_by(0));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes() {
        let config: LimiterConfig = serde_json::from_str(r#"{ "concurrency": 8 }"#).unwrap();
        assert_eq!(config.concurrency.get(), Some(8));

        let config: LimiterConfig = serde_json::from_str(r#"{ "concurrency": "inf" }"#).unwrap();
        assert_eq!(config.concurrency, Concurrency::Unbounded);

        let config: LimiterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LimiterConfig::default());

        assert!(serde_json::from_str::<LimiterConfig>(r#"{ "concurrency": 0 }"#).is_err());
    }
}
