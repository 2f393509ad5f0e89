/// Evaluation and parse errors.
///
/// Every error carries a JSONata-style `XNNNN` code, a human-readable
/// message, and the source position of the failing token or node
/// (reported as -1 when unknown).
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: &'static str,
    pub message: String,
    pub position: Option<usize>,
}

impl Error {
    pub fn new(code: &'static str, position: usize, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            position: Some(position),
        }
    }

    /// An error with no source position (reported as -1).
    pub fn unpositioned(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            position: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pos = self.position.map_or(-1, |p| p as i64);
        write!(f, "{} @ {}: {}", self.code, pos, self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

// Lexer errors
pub const S0101_UNTERMINATED_STRING: &str = "S0101";
pub const S0102_BAD_NUMBER: &str = "S0102";
pub const S0103_BAD_ESCAPE: &str = "S0103";
pub const S0105_UNTERMINATED_QUOTED_NAME: &str = "S0105";
pub const S0204_UNKNOWN_CHAR: &str = "S0204";

// Parser errors
pub const S0201_SYNTAX_ERROR: &str = "S0201";
pub const S0202_EXPECTED_TOKEN: &str = "S0202";
pub const S0203_UNEXPECTED_END: &str = "S0203";
pub const S0208_BAD_PARAMETER: &str = "S0208";
pub const S0211_INVALID_PREFIX: &str = "S0211";
pub const S0212_EXPECTED_VARIABLE: &str = "S0212";
pub const S0302_BAD_REGEX: &str = "S0302";

// Signature errors
pub const S0401_BAD_SIGNATURE: &str = "S0401";

// Evaluation: structural
pub const S0217_NO_PARENT: &str = "S0217";
pub const S0500_UNSUPPORTED_NODE: &str = "S0500";

// Evaluation: type
pub const T0212_BAD_CUSTOM_RESULT: &str = "T0212";
pub const T0410_ARGUMENT_TYPE: &str = "T0410";
pub const T0412_ARGUMENT_ELEMENT_TYPE: &str = "T0412";
pub const T1003_KEY_NOT_STRING: &str = "T1003";
pub const T1005_NOT_CALLABLE: &str = "T1005";
pub const T1006_CONTEXT_NOT_CALLABLE: &str = "T1006";
pub const T1007_PARTIAL_NON_FUNCTION: &str = "T1007";
pub const T1008_PARTIAL_UNKNOWN_FUNCTION: &str = "T1008";
pub const T2001_LHS_NOT_NUMBER: &str = "T2001";
pub const T2002_RHS_NOT_NUMBER: &str = "T2002";
pub const T2003_RANGE_LHS_NOT_INTEGER: &str = "T2003";
pub const T2004_RANGE_RHS_NOT_INTEGER: &str = "T2004";
pub const T2006_APPLY_NOT_FUNCTION: &str = "T2006";
pub const T2008_SORT_TERM_NOT_COMPARABLE: &str = "T2008";
pub const T2009_COMPARE_TYPE_MISMATCH: &str = "T2009";
pub const T2010_COMPARE_NOT_COMPARABLE: &str = "T2010";
pub const T2011_TRANSFORM_UPDATE_NOT_OBJECT: &str = "T2011";
pub const T2012_TRANSFORM_DELETE_NOT_STRINGS: &str = "T2012";

// Evaluation: domain
pub const D1001_NUMBER_NOT_FINITE: &str = "D1001";
pub const D1002_NEGATE_NON_NUMBER: &str = "D1002";
pub const D1004_ZERO_LENGTH_MATCH: &str = "D1004";
pub const D1009_DUPLICATE_GROUP_KEY: &str = "D1009";
pub const D2014_RANGE_TOO_LARGE: &str = "D2014";
pub const D3010_EMPTY_PATTERN: &str = "D3010";
pub const D3011_NEGATIVE_REPLACE_LIMIT: &str = "D3011";
pub const D3020_NEGATIVE_SPLIT_LIMIT: &str = "D3020";
pub const D3030_CAST_FAILED: &str = "D3030";
pub const D3050_REDUCE_ARITY: &str = "D3050";
pub const D3060_SQRT_NEGATIVE: &str = "D3060";
pub const D3061_POWER_NOT_FINITE: &str = "D3061";
pub const D3070_SORT_MIXED_TYPES: &str = "D3070";
pub const D3100_BAD_RADIX: &str = "D3100";
pub const D3110_BAD_TIMESTAMP: &str = "D3110";
pub const D3137_EVALUATOR_ERROR: &str = "D3137";
pub const D3138_SINGLE_MULTIPLE_MATCHES: &str = "D3138";
pub const D3139_SINGLE_NO_MATCH: &str = "D3139";
pub const D3140_UNPAIRED_SURROGATE: &str = "D3140";
pub const D3141_ASSERT_FAILED: &str = "D3141";

// Evaluation: resource
pub const U1001_MAX_DEPTH: &str = "U1001";
pub const U1002_CANCELLED: &str = "U1002";

pub fn max_depth(position: usize, limit: usize) -> Error {
    Error::new(
        U1001_MAX_DEPTH,
        position,
        format!("expression nesting exceeds the depth limit of {limit}"),
    )
}

pub fn cancelled(position: usize) -> Error {
    Error::new(U1002_CANCELLED, position, "evaluation was cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_position() {
        let err = Error::new(T0410_ARGUMENT_TYPE, 12, "bad argument");
        assert_eq!(err.to_string(), "T0410 @ 12: bad argument");
    }

    #[test]
    fn unknown_position_reported_as_minus_one() {
        let err = Error::unpositioned(D3137_EVALUATOR_ERROR, "boom");
        assert_eq!(err.to_string(), "D3137 @ -1: boom");
    }
}
