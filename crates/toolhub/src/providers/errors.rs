use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Failed to connect to provider `{name}`: {message}")]
    Connection { name: String, message: String },

    #[error("Provider `{name}` did not connect within {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Failed to disconnect provider `{name}`: {message}")]
    Disconnect { name: String, message: String },
}

impl ProviderError {
    pub fn connection<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        ProviderError::Connection {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn disconnect<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        ProviderError::Disconnect {
            name: name.into(),
            message: message.into(),
        }
    }
}
