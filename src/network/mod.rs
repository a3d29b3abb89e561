pub mod address;
pub mod destination;

pub use address::Address;
pub use destination::{Destination, Transport};
