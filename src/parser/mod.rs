pub mod output;
pub mod patterns;

pub use output::*;
pub use patterns::*;
