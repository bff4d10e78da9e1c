mod heartbeat;
mod memory;

pub use heartbeat::{EditSession, EditStart};
pub use memory::MemoryLock;
