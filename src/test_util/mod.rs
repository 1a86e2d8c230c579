//! Utilities for testing code that uses sessions. They are used for testing this crate itself, but
//!  they are also exported for application testing: an in-memory network allows running clients
//!  and servers deterministically in a single test, with control over lost datagrams.

pub mod memory_network;
