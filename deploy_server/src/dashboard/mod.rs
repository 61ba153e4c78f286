//! Dashboard read models.

pub mod health;
