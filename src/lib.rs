// src/lib.rs - Library root for simcoach

pub mod cli;
pub mod infra;
pub mod remote;
pub mod session;
pub mod util;
