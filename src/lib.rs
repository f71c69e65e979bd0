pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod ohlc_csv;
pub mod routes;
pub mod state;
