use poise::serenity_prelude as serenity;
use thiserror::Error;

// Discord JSON error codes for "Unknown Channel", "Unknown Member", "Unknown Role" and "Unknown User".
const UNKNOWN_RESOURCE_CODES: [isize; 4] = [10003, 10007, 10011, 10013];

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("You don't have permission to control this channel")]
    PermissionDenied,
    #[error("{0}")]
    Validation(String),
    #[error("Platform error: {0}")]
    Platform(String),
}

impl VoiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serenity::Error> for VoiceError {
    fn from(e: serenity::Error) -> Self {
        if let serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response)) = &e {
            if response.status_code.as_u16() == 404
                || UNKNOWN_RESOURCE_CODES.contains(&response.error.code)
            {
                return Self::NotFound("Platform resource");
            }
        }
        Self::Platform(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
