pub mod account;
pub mod asset;
pub mod order;

pub use account::*;
pub use asset::*;
pub use order::*;
