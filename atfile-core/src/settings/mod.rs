pub mod config;
pub mod manager;


pub use config::{AttachmentSettings, BusSettings, FileSettings, Settings, SuggestionSettings};
pub use manager::SettingsManager;
