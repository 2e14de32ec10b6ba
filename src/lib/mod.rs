#[macro_use]
extern crate lazy_static;
extern crate tracing;

pub mod cli;
pub mod device;
pub mod history;
pub mod logger;
pub mod poller;
pub mod server;
pub mod sink;
pub mod status;
