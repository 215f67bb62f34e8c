//! Scan session orchestration services.

pub mod checkout;
pub mod fingerprint;
pub mod gate;
pub mod linker;
pub mod tracker;
pub mod wizard;
