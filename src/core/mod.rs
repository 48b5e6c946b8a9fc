pub mod domain;
pub mod errors;
pub mod exec;
pub mod pipeline;
pub mod profile;
pub mod sandbox;
pub mod traits;
