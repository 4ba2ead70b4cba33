use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Failure taxonomy reported to clients on failed jobs and rejected uploads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidImage,
    CorruptImage,
    ImageTooLarge,
    OcrFailed,
    AiFailed,
    NoBooksDetected,
    Timeout,
    RateLimited,
    ServiceUnavailable,
    DatabaseError,
    UnexpectedError,
}

impl ErrorCode {
    /// Upload problems are the caller's fault; resubmitting the same file won't help.
    pub fn can_retry(self) -> bool {
        !matches!(
            self,
            ErrorCode::InvalidImage | ErrorCode::CorruptImage | ErrorCode::ImageTooLarge
        )
    }

    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCode::InvalidImage => "Please upload a JPEG, PNG or WebP photo of your bookshelf.",
            ErrorCode::CorruptImage => "The image could not be read. Please take the photo again.",
            ErrorCode::ImageTooLarge => "The image is too large. Please upload a smaller photo.",
            ErrorCode::OcrFailed => "We couldn't read the text on the spines. Try a clearer image.",
            ErrorCode::AiFailed => "Book detection failed. Try a clearer image.",
            ErrorCode::NoBooksDetected => "No books were found in this photo. Try a clearer image.",
            ErrorCode::Timeout => "Detection took too long. Please try again.",
            ErrorCode::RateLimited => "Too many requests right now. Please try again in a minute.",
            ErrorCode::ServiceUnavailable => {
                "The detection service is temporarily unavailable. Please try again."
            }
            ErrorCode::DatabaseError => "Something went wrong saving your results. Please try again.",
            ErrorCode::UnexpectedError => "Something went wrong. Please try again.",
        }
    }
}
