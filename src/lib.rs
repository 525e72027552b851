//! Newsdesk - a personal news dashboard
//!
//! Searches a news API, shows the weather for a city, reads article
//! descriptions aloud and lets registered users bookmark articles.
//! Everything is served as server-rendered HTML.

pub mod auth;
pub mod config;
pub mod db;
pub mod forms;
pub mod news;
pub mod notify;
pub mod routes;
pub mod session;
pub mod speech;
pub mod uploads;
pub mod weather;
