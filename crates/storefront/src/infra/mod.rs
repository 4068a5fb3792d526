pub mod db;
pub mod pix_gateway;

// In-memory gateway only available with e2e-testing feature or debug builds
#[cfg(any(feature = "e2e-testing", debug_assertions))]
pub mod pix_gateway_mock;
