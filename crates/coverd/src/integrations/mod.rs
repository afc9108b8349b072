pub mod cover_tilt;
pub mod demo;
