pub mod info;
pub mod providers;
