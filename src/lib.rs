pub mod config;
pub mod constants;
pub mod core;
pub mod docker;

#[cfg(test)]
mod stubs;
