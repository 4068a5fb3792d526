mod checkout_routes;

pub use checkout_routes::*;
