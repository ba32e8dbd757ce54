pub mod capture;
pub mod usage;
