pub mod bootstrap;
pub mod commands;
pub mod focus_engine;
pub mod focus_session;
