pub mod backoff;
pub mod duplicate;
pub mod executor;
pub mod index;
pub mod key;
pub mod planner;
pub mod report;
