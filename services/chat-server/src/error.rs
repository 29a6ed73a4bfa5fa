use rt_chat_protocol::CommandAction;

/// Errors a handler can raise while servicing a request. Most are surfaced
/// to the initiating client as a `CommandRequest` reply carrying a
/// `Refused`/`Deny*` action rather than closing the connection.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("auth failure: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("race lost")]
    RaceLost,
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChatError {
    /// Maps an error to the user-visible `CommandAction` reply: always a
    /// `CommandRequest` on CMD carrying a `REFUSED`/`DENY_*` action with a
    /// human-readable reason.
    pub fn to_refusal(&self) -> CommandAction {
        match self {
            ChatError::Auth(reason) => CommandAction::Refused { reason: reason.clone() },
            ChatError::NotFound(what) => CommandAction::Refused { reason: format!("not found: {what}") },
            ChatError::RaceLost => CommandAction::Managed,
            ChatError::Store(e) => CommandAction::Refused { reason: format!("internal error: {e}") },
            ChatError::Integrity(reason) => CommandAction::Refused { reason: reason.clone() },
            ChatError::Protocol(reason) => CommandAction::Refused { reason: reason.clone() },
        }
    }
}
