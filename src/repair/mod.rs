pub mod classify;
pub mod patch;
pub mod patch_validator;
pub mod rules;
pub mod surgical;
