pub mod build;
pub mod publish;
pub mod validate;
