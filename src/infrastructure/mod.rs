pub mod config;
pub mod error;
pub mod focus_api_client;
pub mod session_cache;
pub mod storage;
