//! # Synchronization Primitives for Entity Attributes
//!
//! ## The Problem
//!
//! ```text
//! Extension A (system thread 1):  WRITE "velocity"
//! Extension B (system thread 2):  WRITE "heading"
//! Scene update (tick thread):     READ  everything
//!
//! Writing straight into the readable map: readers see half a tick.
//! ```
//!
//! ## The Solution: Triple Buffering
//!
//! ```text
//! During tick N:
//!   Producers publish into UNSTABLE (one insert per key per tick)
//!   Readers read MAIN (last flushed state)
//!
//! End of tick N (swap_and_flush):
//!   SWAP   stable <-> unstable     (pointer exchange, no data copy)
//!   CLEAR  new unstable
//!   MERGE  stable -> main          (last writer wins)
//! ```
//!
//! Every buffer has its own lock. Readers of `main` only contend with the
//! merge phase, never with producers.

mod property_store;

pub use property_store::PropertyStore;
