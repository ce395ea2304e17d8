pub mod config;
pub mod logging;
pub mod record;
pub mod server;
pub mod storage;
