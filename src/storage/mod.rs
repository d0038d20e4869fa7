//! Storage abstraction layer.
//!
//! Barrel files are addressed by name through the [`Storage`] trait. Two
//! backends are provided: [`MemoryStorage`] for tests and transient indexes,
//! and [`FileStorage`] for a directory on the local file system.

pub mod file;
pub mod memory;
pub mod structured;
pub mod traits;

// Re-export commonly used types
pub use file::*;
pub use memory::*;
pub use structured::*;
pub use traits::*;
