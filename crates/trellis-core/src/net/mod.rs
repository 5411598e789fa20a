//! Outbound-network policy shared by every component that dials out.

pub mod ssrf;

pub use ssrf::validate_outbound_url;
