pub mod account;
pub mod api;
pub mod config;
pub mod course;
pub mod db;
pub mod error;
pub mod payment;
pub mod server;
pub mod syllabus;
pub mod utils;
