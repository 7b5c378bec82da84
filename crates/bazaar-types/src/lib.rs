//! Wire types shared by the Bazaar server and its API client.

pub mod api;
pub mod models;
