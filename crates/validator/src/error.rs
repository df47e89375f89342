use scpt_common::Address;
use scpt_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("no eligible validators for height {height} (epoch {epoch})")]
    NoValidators { height: u64, epoch: u64 },

    #[error("stake of {0} does not fit in 128 bits")]
    PowerOverflow(Address),

    #[error("height {0} has no validator set")]
    GenesisHeight(u64),

    #[error("epoch interval must be positive")]
    InvalidEpochConfig,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type ValidatorResult<T> = Result<T, ValidatorError>;
