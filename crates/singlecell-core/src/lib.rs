//! Core types, config, errors, and wire protocol for singlecell.

pub mod config;
pub mod error;
pub mod ids;
pub mod markup;
pub mod protocol;
