//! Client-side data model and wire decoding for the scan backend.

pub mod payment;
pub mod progress;
pub mod report;
pub mod session;
pub mod tier;
