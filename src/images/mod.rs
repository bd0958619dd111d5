pub mod services;

pub use services::ImageUpload;
