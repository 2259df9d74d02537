//! `pbft-smr` implements the core of a practical Byzantine fault tolerant
//! (PBFT) replicated agreement service: the replica state machine driving
//! client requests through the pre-prepare / prepare / commit / reply
//! phases, a checkpoint-based garbage collector bounding replica memory,
//! and a view-change subsystem that replaces a suspected-faulty primary.

pub mod bft;
