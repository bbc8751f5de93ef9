pub mod mime;
pub mod models;
