pub mod memory;

pub use memory::{Folder, MemoryBackend};
