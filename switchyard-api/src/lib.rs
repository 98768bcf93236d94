//! Switchyard API Library
//!
//! Exposes the topology engine, the workload correlator, the interfaces-file
//! editor and the service plumbing for use by tests and external
//! integrations.

// Core modules
pub mod config;
pub mod error;
pub mod validation;

// Application state
pub mod state;
pub use state::AppState;

// Switch topology and management
pub mod ovs;

// Workload correlation
pub mod workloads;

// Interfaces-file editing
pub mod netcfg;

// Remote command transport
pub mod remote;

// Database
pub mod db;

// Logging configuration
pub mod logging;
