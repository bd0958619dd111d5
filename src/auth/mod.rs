pub mod dto;
pub mod repo;
pub mod services;

pub use dto::{AuthContext, AuthSession, ProfileUpdate, RegisterOutcome, SessionState, UserProfile};
pub use services::{update_profile, SessionManager};
