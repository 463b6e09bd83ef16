//! Error handling for micro-snmpd

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed encoding: {0}")]
    Malformed(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("MIB error: {0}")]
    Mib(String),

    #[error("Collector error: {0}")]
    Collector(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    pub fn mib<S: Into<String>>(msg: S) -> Self {
        Self::Mib(msg.into())
    }

    pub fn collector<S: Into<String>>(msg: S) -> Self {
        Self::Collector(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}
