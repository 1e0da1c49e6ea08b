pub mod domain;
pub mod ephemeral;
pub mod error;
pub mod protocol;
pub mod validation;
