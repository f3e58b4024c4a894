mod macros;

pub use macros::*;
