pub mod channel;
pub mod node;
pub mod registry;
pub mod relay;

pub use channel::{FullDuplexChannel, HalfDuplexChannel};
pub use node::{Caller, CallerConstructor, Listener, ListenerConstructor, Node};
