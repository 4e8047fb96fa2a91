pub mod config;
pub mod crawl;
pub mod document;
pub mod error;
pub mod feed;
pub mod parser;
pub mod record;
pub mod sink;
pub mod transport;
