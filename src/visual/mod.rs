pub mod capture;
pub mod diff;
pub mod visibility;
