use std::fmt;

#[derive(Debug)]
pub enum HalftoneError {
    InvalidConfiguration(String),
    Asset(String),
    Encode(String),
    Io(std::io::Error),
}

impl fmt::Display for HalftoneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalftoneError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            HalftoneError::Asset(message) => write!(f, "asset error: {}", message),
            HalftoneError::Encode(message) => write!(f, "encode error: {}", message),
            HalftoneError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for HalftoneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HalftoneError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HalftoneError {
    fn from(value: std::io::Error) -> Self {
        HalftoneError::Io(value)
    }
}
