//! End-to-end tests: the full scheduler against an in-memory chain and
//! explorer.

mod mirroring;
mod sim_chain;
