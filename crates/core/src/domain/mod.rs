pub mod product;
pub mod quote;
pub mod session;
