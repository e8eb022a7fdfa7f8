//! Batched in-game reward actions issued through the backend client

pub mod draw;
pub mod grow;

pub use draw::DrawRunner;
pub use grow::GrowRunner;
