pub mod config;
pub mod data;
pub mod display;
pub mod equipment;
pub mod error;
pub mod history;
pub mod model;
pub mod monitor;
pub mod protocol;
pub mod session;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
