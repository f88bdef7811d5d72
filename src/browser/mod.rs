pub mod chrome;
pub mod sandbox;
pub mod scripts;
