//! Block and chain validation rules

pub mod validation;

pub use validation::BlockValidator;
