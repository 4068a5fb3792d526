mod discount_routes;

pub use discount_routes::*;
