pub mod chime;
pub mod commands;
pub mod common;
pub mod configs;
pub mod events;
pub mod session;
pub mod voice;
