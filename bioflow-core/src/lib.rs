//! Bioflow Core
//!
//! Core types shared by the bioflow storage layer and runner.
//!
//! This crate contains:
//! - Domain types: partitions, work requests, materializations, container runs
//! - Image descriptors: formatting of container build commands

pub mod domain;
pub mod image;
