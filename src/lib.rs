pub mod auth;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod creatures;
pub mod error;
pub mod gateway;
pub mod images;
pub mod kv;
pub mod news;
pub mod search;
pub mod skills;
pub mod state;
pub mod storage;

pub use error::{Error, Result};
pub use state::AppState;
