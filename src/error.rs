use std::error::Error;
use std::fmt;

/// Create a `SimError` result from anything printable.
#[macro_export]
macro_rules! sim_error {
    ($msg:expr) => {
        Err($crate::error::SimError($msg.to_string()))
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimError(pub String);

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl Error for SimError {}

pub type SimResult<T = ()> = Result<T, SimError>;

/// Reasons a `SystemSpec` is rejected before any model is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NotPowerOfTwo { field: &'static str, value: u32 },
    OutOfRange { field: &'static str, value: u32, min: u32, max: u32 },
    PageNotLargerThanLine { page_size: u32, line_width: u32 },
    NoTagBits { addr_width: u32, page_bits: u32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotPowerOfTwo { field, value } => {
                write!(f, "{field} must be a power of two, got {value}")
            }
            ConfigError::OutOfRange { field, value, min, max } => {
                write!(f, "{field} = {value} outside [{min}, {max}]")
            }
            ConfigError::PageNotLargerThanLine { page_size, line_width } => {
                write!(f, "page of {page_size} bytes does not exceed one {line_width}-bit line")
            }
            ConfigError::NoTagBits { addr_width, page_bits } => {
                write!(f, "{addr_width}-bit addresses leave no tag bits above {page_bits} page bits")
            }
        }
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for SimError {
    fn from(e: ConfigError) -> Self {
        SimError(format!("invalid configuration: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fails(n: u32) -> SimResult<u32> {
        if n > 3 {
            return crate::sim_error!(format!("{n} is too large"));
        }
        Ok(n)
    }

    #[test]
    fn macro_builds_error() {
        assert_eq!(fails(2), Ok(2));
        let err = fails(7).unwrap_err();
        assert_eq!(err.to_string(), "Error: 7 is too large");
    }

    #[test]
    fn config_error_converts() {
        let e: SimError = ConfigError::NotPowerOfTwo { field: "page_size", value: 3 }.into();
        assert!(e.0.contains("page_size must be a power of two"));
    }
}
