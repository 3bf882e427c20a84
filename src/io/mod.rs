pub mod deck;
pub mod diagnostics;
pub mod orbsg;
