//! Sample protocols for exercising the checker.
//!
//! Each module provides node implementations, a factory helper and a matching
//! verifier. They are deliberately small so the interleaving space stays
//! tractable in tests.

pub mod broadcast;
pub mod echo;
pub mod register;

pub use broadcast::{BroadcastNode, BROADCAST};
pub use echo::{echo_verifier, EchoClient, EchoMessage, EchoServer, CLIENT, SERVER};
pub use register::{read_your_writes, RegisterClient, RegisterMessage, RegisterServer};
