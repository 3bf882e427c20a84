pub mod basis;
pub mod grids;
