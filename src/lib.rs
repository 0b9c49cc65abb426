// HTTP routes
pub mod api;

// File-backed redirect cache
pub mod cache;

// Configuration loading and env overrides
pub mod config;

// Stored token and upstream auth headers
pub mod credentials;

// Atomic file writes
pub mod persist;

// Token detection and cookie handling
pub mod token;

// Outbound KimVan calls
pub mod upstream;
