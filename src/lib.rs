//! Watchdog scan orchestration service
//!
//! This library provides the core of the watchdog-scan service: an
//! asynchronous lifecycle coordinator that starts long-running scans on an
//! external vulnerability scanner, tracks each job durably through a
//! compare-and-swap status store, and persists the final report exactly
//! once.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
