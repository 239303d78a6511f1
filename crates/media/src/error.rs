use thiserror::Error;

/// Errors raised while accepting or storing an upload.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The file name does not end in `.jpg`, `.jpeg` or `.png`.
    #[error("Please, upload an image")]
    UnsupportedFile,

    #[error("File too large")]
    TooLarge { limit: usize, actual: usize },

    /// The bytes are not a readable JPEG or PNG.
    #[error("Could not read the uploaded image")]
    Decode(#[source] image::ImageError),

    #[error("Could not encode image: {0}")]
    Encode(#[source] image::ImageError),
}

impl MediaError {
    /// True when the upload itself was at fault.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, MediaError::Encode(_))
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
