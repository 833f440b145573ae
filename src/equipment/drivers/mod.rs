pub mod psu_rigol;
