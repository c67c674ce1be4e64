pub mod jwt;
pub mod principal;

pub use principal::OptionalPrincipal;
