pub mod focus_timer;
pub mod models;
pub mod presentation;
