// File: src/services/mod.rs

pub mod command_service;
pub mod playlist_service;

pub use command_service::{ChatCommandContext, CommandResponse, MusicCommandService};
pub use playlist_service::PlaylistService;
