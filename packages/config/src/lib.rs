// ABOUTME: Configuration constants shared by the RCE gateway packages
// ABOUTME: Re-exports environment variable names so every package reads the same keys

pub mod constants;

pub use constants::*;
