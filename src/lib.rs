#[macro_use]
extern crate log;

pub mod policy;
pub mod server;
pub mod writeonly;
