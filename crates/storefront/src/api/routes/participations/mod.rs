mod participation_routes;

pub use participation_routes::*;
