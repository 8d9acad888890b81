//! API route handlers

pub mod health;
pub mod observability;
pub mod scrape;
