//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Math types and matrix builders
//! - Bounding volumes and intersection tests
//! - Handle types for arena-owned objects
//! - Time management
//! - Logging utilities

pub mod math;
pub mod geometry;
pub mod collections;
pub mod time;
pub mod logging;
