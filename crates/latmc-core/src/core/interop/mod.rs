//! # Interop Module
//!
//! The binary contract with the native simulation engine.
//!
//! ## Overview
//!
//! Fixed-size records ([`records`]) are `#[repr(C)]` plain-old-data structs whose byte
//! image is the wire format. Records and plain value tables are wrapped into [`blob::Blob`]s,
//! each a little-endian header followed by the payload, and handed to a
//! [`sink::DataSink`] for storage.
//!
//! Record payloads use the native byte order of the build host, matching the engine that
//! reads them on the same machine; headers are always little-endian.

pub mod blob;
pub mod records;
pub mod sink;
