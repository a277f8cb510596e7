//! Core domain types
//!
//! These types describe the units of work flowing through the asset pipeline
//! and the records each stage leaves behind. They are shared between the
//! storage layer (for persistence) and the runner (for execution).

pub mod asset;
pub mod container;
pub mod log;
pub mod partition;
pub mod pipeline;
