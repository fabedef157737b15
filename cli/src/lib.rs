pub mod distmat_commands;
pub mod pipeline;
#[macro_use]
extern crate log;
