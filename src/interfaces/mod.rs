pub mod providers;
pub mod registry;
