//! Cancer-risk image classification with a local prediction history,
//! served over HTTP.

pub mod app;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod history;
pub mod images;
pub mod models;
pub mod screens;
