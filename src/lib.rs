pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod filename;
pub mod landing;
pub mod normalize;
pub mod output;
pub mod router;
pub mod store;
pub mod tool;
