//! Centralized constants for the stackset-controller project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod annotations;
pub mod defaults;
pub mod names;
