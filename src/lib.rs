// yami-player - FFmpeg decoding with zero-copy EGL/GLES presentation
// Main library entry point

pub mod decoder;
pub mod dump;
pub mod player;
pub mod renderer;

pub use player::{play, Player, PlayerConfig, PlayerError, PlayerStats, RenderMode};
