//! Blocking synchronization primitives used by the runtime threads.

mod semaphore;
pub use semaphore::Semaphore;
