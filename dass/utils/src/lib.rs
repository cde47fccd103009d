//! Shared utilities for the DASS compiler.
mod errors;
mod id;
mod namegenerator;
mod out_file;

pub use errors::{DassResult, Error, ErrorKind, MultiError};
pub use id::{GSym, GetName, Id};
pub use namegenerator::NameGenerator;
pub use out_file::OutputFile;
