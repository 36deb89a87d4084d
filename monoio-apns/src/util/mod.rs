pub mod semaphore;

pub use semaphore::{DynamicSemaphore, Permit, SemaphoreClosed};
