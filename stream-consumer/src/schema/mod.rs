pub mod decoder;
pub mod registry;
pub mod wire;
