//! Domain types - core business entities
//!
//! These types describe what flows through the pipeline and are independent of
//! how it is stored or transported.

pub mod config;
pub mod item;
pub mod record;
