pub mod config;
pub mod health;
pub mod relay;
pub mod telegram_log;
