//! Configuration management and file loading.

pub mod settings;
