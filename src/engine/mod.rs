pub mod error;
pub mod orbitals;
pub mod qemp2;

pub use error::EngineError;
