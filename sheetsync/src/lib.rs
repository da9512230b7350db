pub mod config;
pub mod logging;
pub mod runner;
pub mod service;
pub mod shutdown;
pub mod sync;
