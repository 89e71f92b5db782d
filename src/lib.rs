#![doc = include_str!("../README.md")]

pub mod cancel;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod job;
pub mod mongo;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod supervisor;
pub mod worker;
pub mod workspace;
