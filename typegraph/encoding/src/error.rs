use thiserror::Error;

pub type EncodingResult<T> = Result<T, EncodingError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodingError {
    #[error("malformed key: {0}")]
    MalformedKey(&'static str),
    #[error("unsupported schema version {0}")]
    UnsupportedSchemaVersion(u8),
}
