pub mod access;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod images;
pub mod logging;
pub mod process;
pub mod readiness;
pub mod stack;
pub mod ui;
pub mod workdir;

#[cfg(test)]
mod testing;
