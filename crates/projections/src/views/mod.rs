//! Read model views for the query side.

pub mod order_board;
pub mod user_directory;

pub use order_board::{OrderBoardView, OrderCard, OrderFilter};
pub use user_directory::{UserCard, UserDirectoryView};
