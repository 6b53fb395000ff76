pub mod config;
pub mod credential_store;
pub mod error;
pub mod preference_store;
pub mod session_mapper;
pub mod timer_api_client;
