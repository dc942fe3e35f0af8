pub mod api;
pub mod cli;
pub mod config;
pub mod entities;
pub mod error;
pub mod git;
pub mod library;
pub mod storage;
pub mod tags;
pub mod thumbnail;
pub mod tvs;
pub mod utils;
