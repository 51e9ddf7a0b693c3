pub mod paper;
pub mod traits;

pub use paper::{PaperExecutor, PaperFault};
pub use traits::{breaker_name, OrderExecutor};
