pub mod bootstrap;
pub mod commands;
pub mod local_clock;
pub mod session_sync;
pub mod timer_controller;

#[cfg(test)]
mod test_support;
