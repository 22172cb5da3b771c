pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod kegg;
pub mod output;
pub mod reference;
pub mod results;
pub mod samples;
pub mod store;
