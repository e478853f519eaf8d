//! Stateless repositories; every method takes `&Connection`.

pub mod alerts;
pub mod readings;

pub use alerts::AlertRepo;
pub use readings::ReadingRepo;
