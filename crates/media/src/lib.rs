//! Uploaded pictures.
//!
//! [`ImageProcessor`] turns an upload into the one format the marketplace
//! serves (a 350×350 PNG) and an [`ImageStore`] keeps the result keyed by
//! owner. Stored images carry no URL: the API derives it per request.

pub mod error;
pub mod processor;
pub mod store;

pub use error::{MediaError, Result};
pub use processor::{DEFAULT_MAX_UPLOAD_BYTES, ImageProcessor, OUTPUT_SIZE};
pub use store::{ImageKey, ImageKind, ImageStore, InMemoryImageStore};
