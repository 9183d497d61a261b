//! # Resilience Module
//!
//! Backpressure handling for the stage processors.

pub mod rate_controller;

pub use rate_controller::RateController;
