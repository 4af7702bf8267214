pub mod flash;
pub mod shift_register;
