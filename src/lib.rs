#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cli;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod driver;
pub mod error;
pub mod hierarchy;
pub mod lock;
pub mod logging;
pub mod node;
pub mod paths;
pub mod provisioner;
pub mod registry;
pub mod render;
pub mod tags;
