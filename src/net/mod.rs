//! Client-side sockets.
//!
//! `listener` hands out accepted clients, each holding one of a fixed
//! number of slots. `connection` numbers connections and counts the client
//! tasks still running so shutdown can wait for them.

pub mod connection;
pub mod listener;
