//! Shared configuration used by every other module.

pub mod config;
