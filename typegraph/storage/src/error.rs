use thiserror::Error;

use crate::timestamp::TimestampError;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("concurrent schema write: key was committed after this transaction started")]
    ConcurrentSchemaWrite,
    #[error("commit timed out waiting for the store write lock")]
    CommitTimeout,
    #[error("transaction is poisoned and must be rolled back")]
    TransactionPoisoned,
    #[error("transaction is already committed or rolled back")]
    TransactionClosed,
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}
