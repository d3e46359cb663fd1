use solana_client::client_error::{ClientError, ClientErrorKind};
use thiserror::Error;

/// Ledger client error types
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport-level errors (network, connection reset)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Timeout errors
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    #[error("Blockhash not found (endpoint: {endpoint})")]
    BlockhashNotFound { endpoint: String },

    #[error("Account not found: {account} (endpoint: {endpoint})")]
    AccountNotFound { account: String, endpoint: String },

    #[error("Insufficient funds (endpoint: {endpoint})")]
    InsufficientFunds { endpoint: String },

    /// Account data could not be decoded (e.g. not an address table)
    #[error("Invalid account data for {account}: {reason}")]
    InvalidAccountData { account: String, reason: String },

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport { .. } => true,
            LedgerError::Timeout { .. } => true,
            LedgerError::RateLimitExceeded { .. } => true,
            LedgerError::BlockhashNotFound { .. } => true,

            LedgerError::AccountNotFound { .. } => false,
            LedgerError::InsufficientFunds { .. } => false,
            LedgerError::InvalidAccountData { .. } => false,
            LedgerError::Internal(_) => false,

            // Retry on server errors (5xx)
            LedgerError::RpcResponse { code, .. } => {
                matches!(code, Some(c) if (500..600).contains(c))
            }
        }
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: ClientError, endpoint: &str, timeout_ms: u64) -> Self {
        let endpoint = endpoint.to_string();
        if matches!(err.kind(), ClientErrorKind::Io(_)) {
            return LedgerError::Transport {
                endpoint,
                message: err.to_string(),
            };
        }

        let err_str = err.to_string().to_lowercase();

        if err_str.contains("blockhash not found") {
            LedgerError::BlockhashNotFound { endpoint }
        } else if err_str.contains("account not found") {
            LedgerError::AccountNotFound {
                account: "unknown".to_string(),
                endpoint,
            }
        } else if err_str.contains("insufficient funds")
            || err_str.contains("insufficient lamports")
        {
            LedgerError::InsufficientFunds { endpoint }
        } else if err_str.contains("rate limit")
            || err_str.contains("too many requests")
            || err_str.contains("429")
        {
            LedgerError::RateLimitExceeded { endpoint }
        } else if err_str.contains("timeout") || err_str.contains("timed out") {
            LedgerError::Timeout {
                endpoint,
                timeout_ms,
            }
        } else if err_str.contains("connection")
            || err_str.contains("error sending request")
            || err_str.contains("broken pipe")
        {
            LedgerError::Transport {
                endpoint,
                message: err.to_string(),
            }
        } else {
            let code = err_str
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_end_matches(',').parse::<i64>().ok());

            LedgerError::RpcResponse {
                endpoint,
                message: err.to_string(),
                code,
            }
        }
    }
}
