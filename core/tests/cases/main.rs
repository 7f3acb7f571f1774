#[path = "../common/mod.rs"]
mod common;

mod config;
mod determinism;
mod ordering;
mod scheduler_state;
