//! Identity directory and contact list

pub mod contact_book;
pub mod directory;
pub mod errors;
pub mod file_directory;
pub mod memory_directory;

pub use contact_book::ContactBook;
pub use directory::Directory;
pub use errors::{DirectoryError, DirectoryResult};
pub use file_directory::FileDirectory;
pub use memory_directory::MemoryDirectory;
