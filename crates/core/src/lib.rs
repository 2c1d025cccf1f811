//! Shared domain types for the Depot artifact repository.
//!
//! This crate carries everything the other crates agree on:
//! - Application configuration and its validation rules
//! - Logical path normalisation and prefix matching
//! - Header/value parsers (expiry, stream/group, tags, byte sizes)
//! - The batch download mode enum

pub mod config;
pub mod error;
pub mod expiry;
pub mod mode;
pub mod path;
pub mod size;
pub mod stream;
pub mod tags;

pub use error::{Error, Result};
