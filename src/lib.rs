pub mod core;
pub mod driver;
pub mod engine;
pub mod io;
