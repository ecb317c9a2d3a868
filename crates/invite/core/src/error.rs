use crate::model::CodeType;
use crate::store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type InviteResult<T> = Result<T, InviteError>;

/// Outcomes reported by the allocation and binding engine.
///
/// `AlreadyBound`, `OwnerAlreadyBound` and `TypeMismatch` are terminal and must
/// never be retried by this crate. `Storage` is the opaque wrapper for backend
/// failures; the caller owns the retry decision.
#[derive(Debug, Error)]
pub enum InviteError {
    #[error("invite code {0} already exists")]
    DuplicateCode(String),

    #[error("invite code {0} is already bound")]
    AlreadyBound(String),

    #[error("identity {0} already owns an invite code")]
    OwnerAlreadyBound(String),

    #[error("invite code {code} is {actual}, expected one of {expected:?}")]
    TypeMismatch {
        code: String,
        actual: CodeType,
        expected: Vec<CodeType>,
    },

    #[error("insufficient pool: needed {needed}, available {available}")]
    InsufficientPool { needed: u64, available: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("required tasks not completed: {0}")]
    TaskIncomplete(String),

    #[error("identity incomplete: {0}")]
    IdentityIncomplete(String),

    #[error("invalid owner: {0}")]
    InvalidOwner(String),

    #[error("requested {requested} codes, at most {max} allowed")]
    InvalidTarget { requested: u64, max: u64 },

    #[error("code generator failed: {0}")]
    Generator(String),

    #[error("quest provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl InviteError {
    /// Binding conflicts: someone else got there first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            InviteError::AlreadyBound(_) | InviteError::OwnerAlreadyBound(_)
        )
    }

    /// Failures that carry no domain meaning for the caller.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            InviteError::Storage(_) | InviteError::Generator(_) | InviteError::Provider(_)
        )
    }
}

impl From<StoreError> for InviteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateCode(code) => InviteError::DuplicateCode(code),
            StoreError::InsufficientPool { needed, available } => {
                InviteError::InsufficientPool { needed, available }
            }
            StoreError::InvalidInput(message) => InviteError::InvalidOwner(message),
            other => InviteError::Storage(other.to_string()),
        }
    }
}
