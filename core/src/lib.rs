//! Task coordination for a tree of builds: a root build plus the builds it
//! includes, each contributing tasks to one shared task graph.

pub mod api;
pub mod build;
pub mod config;
pub mod controller;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod executor;
pub mod facade;
pub mod lease;
pub mod registry;
pub mod scripted;
pub mod services;
pub mod state;
pub mod util;
