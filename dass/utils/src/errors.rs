//! Errors generated by the compiler.
use itertools::Itertools;
use thiserror::Error as ThisError;

/// Convience wrapper to represent success or meaningful compiler error.
pub type DassResult<T> = std::result::Result<T, Error>;

/// Standard error type for DASS errors.
#[derive(Clone)]
pub struct Error {
    kind: Box<ErrorKind>,
    post_msg: Option<String>,
}

/// The kinds of errors the middle-end can raise. Negative analysis answers
/// (a node that cannot be merged, a refuted interchange) are never errors.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad options or missing external files.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// An opcode or control shape that the analyses do not model.
    #[error("Unsupported input: {0}")]
    Unsupported(String),
    /// The island or region cannot be turned into a standalone function.
    #[error("Illegal extraction: {0}")]
    IllegalExtraction(String),
    /// The external decision procedure could not be run or its log read.
    #[error("Verification oracle failure: {0}")]
    VerificationOracleFailure(String),
    /// Interchange search bounds are empty.
    #[error("Invalid search domain: lower bound {lower} is greater than upper bound {upper}")]
    InvalidSearchDomain { lower: u32, upper: u32 },
    /// A depth requested explicitly by the user failed verification.
    #[error("Loop `{loop_name}' cannot be interchanged at depth {depth}")]
    UnsafeInterchange { loop_name: String, depth: u32 },
    /// The program model violates one of its own invariants.
    #[error("Malformed IR: {0}")]
    MalformedIr(String),
    /// Failure to read or write a file.
    #[error("IO error: {0}")]
    Io(String),
    /// Failure to (de)serialize the program model.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Any other error.
    #[error("{0}")]
    Misc(String),
}

impl Error {
    pub fn with_post_msg(mut self, msg: Option<String>) -> Self {
        self.post_msg = msg;
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    pub fn configuration<S: ToString>(msg: S) -> Self {
        ErrorKind::Configuration(msg.to_string()).into()
    }

    pub fn unsupported<S: ToString>(msg: S) -> Self {
        ErrorKind::Unsupported(msg.to_string()).into()
    }

    pub fn illegal_extraction<S: ToString>(msg: S) -> Self {
        ErrorKind::IllegalExtraction(msg.to_string()).into()
    }

    pub fn oracle_failure<S: ToString>(msg: S) -> Self {
        ErrorKind::VerificationOracleFailure(msg.to_string()).into()
    }

    pub fn invalid_search_domain(lower: u32, upper: u32) -> Self {
        ErrorKind::InvalidSearchDomain { lower, upper }.into()
    }

    pub fn unsafe_interchange<S: ToString>(loop_name: S, depth: u32) -> Self {
        ErrorKind::UnsafeInterchange {
            loop_name: loop_name.to_string(),
            depth,
        }
        .into()
    }

    pub fn malformed_ir<S: ToString>(msg: S) -> Self {
        ErrorKind::MalformedIr(msg.to_string()).into()
    }

    pub fn misc<S: ToString>(msg: S) -> Self {
        ErrorKind::Misc(msg.to_string()).into()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind: Box::new(kind),
            post_msg: None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(post) = &self.post_msg {
            write!(f, "\n{post}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        ErrorKind::Io(e.to_string()).into()
    }
}

impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        ErrorKind::Io(e.to_string()).into()
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        ErrorKind::Serialization(e.to_string()).into()
    }
}

/// A collection of errors reported together, for example by a diagnostic
/// pass.
#[derive(Clone)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }
}

impl From<Vec<Error>> for MultiError {
    fn from(errors: Vec<Error>) -> Self {
        MultiError { errors }
    }
}

impl From<Error> for MultiError {
    fn from(e: Error) -> Self {
        MultiError { errors: vec![e] }
    }
}

impl From<std::io::Error> for MultiError {
    fn from(e: std::io::Error) -> Self {
        Error::from(e).into()
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.errors.iter().join("\n"))
    }
}

impl std::fmt::Debug for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_message_is_appended() {
        let err = Error::unsupported("opcode `frem'")
            .with_post_msg(Some("%x = frem float %a, %b".to_string()));
        assert_eq!(
            err.to_string(),
            "Unsupported input: opcode `frem'\n%x = frem float %a, %b"
        );
    }

    #[test]
    fn search_domain_message() {
        let err = Error::invalid_search_domain(4, 2);
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidSearchDomain { lower: 4, upper: 2 }
        ));
        assert!(err.to_string().contains("lower bound 4"));
    }

    #[test]
    fn multi_error_joins_lines() {
        let multi = MultiError::from(vec![
            Error::misc("first"),
            Error::malformed_ir("second"),
        ]);
        assert_eq!(multi.errors().len(), 2);
        assert_eq!(multi.to_string(), "first\nMalformed IR: second");
    }
}
