pub mod drivers;
pub mod psu;
