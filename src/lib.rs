pub mod analysis;
pub mod config;
pub mod store;
pub mod web;
pub mod worker;

pub use web::AppState;
