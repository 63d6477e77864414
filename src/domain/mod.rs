// Domain-specific error types
pub mod errors;

// Port interfaces (Exchange Adapter, Clock, Trading-Mode Gate)
pub mod ports;

// Repository trait (Signal Ledger)
pub mod repositories;

// Core trading entities
pub mod signal;
pub mod types;
