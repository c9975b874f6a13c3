pub mod models;
pub mod quirks;
pub mod settings;
