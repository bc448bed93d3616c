use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid key length: {0} bytes")]
    InvalidLength(usize),

    #[error("invalid hex in key")]
    InvalidHex,
}
