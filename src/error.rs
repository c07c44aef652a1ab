//! Command-line Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open storage at {_0}")]
    Storage(#[error(not(source))] String),
    #[display("could not open database at {_0}")]
    Database(#[error(not(source))] String),
    #[display("mirror \"{_0}\" failed")]
    Mirror(#[error(not(source))] String),
    #[display("could not write output")]
    Output,
}
