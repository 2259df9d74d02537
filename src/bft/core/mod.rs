//! Runtime composition of the protocol core into runnable processes:
//! the replica state machine (`server`) and the client driver that
//! injects transactions and assembles the committed `Blockchain`
//! (`client`).

pub mod client;
pub mod server;
