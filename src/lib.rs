#[macro_use]
extern crate tracing;

pub mod backend;
pub mod cli;
pub mod clock;
pub mod compositor;
pub mod connection;
pub mod frame_clock;
pub mod protocol;
pub mod region;
pub mod state;
pub mod utils;
pub mod window;
