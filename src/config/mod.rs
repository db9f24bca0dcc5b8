pub mod app_context;
pub mod chains;
pub mod constants;
pub mod settings;
