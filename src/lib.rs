pub mod browser;
pub mod cli;
pub mod error;
pub mod geometry;
pub mod input;
pub mod interaction;
pub mod orchestrator;
pub mod repair;
pub mod report;
pub mod trace;
pub mod validation;
pub mod visual;
