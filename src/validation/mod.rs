pub mod aggregator;
pub mod contract;
pub mod report;
pub mod validator;
