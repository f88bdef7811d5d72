pub mod interaction_model;
pub mod validator;
