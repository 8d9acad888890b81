//! HTTP servers and routes

pub mod middleware;
pub mod routes;
mod server;
pub mod types;

pub use routes::scrape::ScrapeState;
pub use server::ApiServer;
