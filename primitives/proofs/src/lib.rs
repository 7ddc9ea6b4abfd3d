mod address;
mod randomness;
mod types;

pub use address::*;
pub use randomness::*;
pub use types::*;
