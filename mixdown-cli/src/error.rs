//! Error type for the command-line front end.

use std::fmt;

use mixdown_lib::RenderError;

#[derive(Debug)]
pub enum CliError {
    Usage(String),
    Io(std::io::Error),
    Wav(hound::Error),
    Json(serde_json::Error),
    Render(RenderError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Usage(message) => write!(f, "{}", message),
            CliError::Io(err) => write!(f, "io error: {}", err),
            CliError::Wav(err) => write!(f, "wav error: {}", err),
            CliError::Json(err) => write!(f, "json error: {}", err),
            CliError::Render(err) => write!(f, "render error: {}", err),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}

impl From<hound::Error> for CliError {
    fn from(err: hound::Error) -> Self {
        CliError::Wav(err)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Json(err)
    }
}

impl From<RenderError> for CliError {
    fn from(err: RenderError) -> Self {
        CliError::Render(err)
    }
}
