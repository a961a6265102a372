pub mod config;
pub mod logging;

pub mod aggregate;
pub mod backend;
pub mod control;
pub mod events;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod tracker;
