mod file;
mod memory;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
