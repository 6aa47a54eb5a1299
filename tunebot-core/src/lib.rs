// tunebot-core/src/lib.rs

pub mod eventbus;
pub mod pipeline;
pub mod platforms;
pub mod repositories;
pub mod resolver;
pub mod services;
pub mod session;
pub mod utils;
pub mod voice;

pub use tunebot_common::error::Error;
pub use tunebot_common::models;
