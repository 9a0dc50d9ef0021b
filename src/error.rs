use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrStateError {
    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("History error: {0}")]
    History(String),

    #[error("State error: {0}")]
    State(String),
}

pub type Result<T> = std::result::Result<T, CrStateError>;

impl From<secp256k1::Error> for CrStateError {
    fn from(err: secp256k1::Error) -> Self {
        CrStateError::Crypto(err.to_string())
    }
}
