pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod startup;

pub use api::routes::*;
pub use config::*;
pub use domain::{
    AddParticipation, CartCheckout, CartLine, CashPayment, Error as StorefrontError, PixCheckout,
    PixCheckoutReceipt, SettlementOrchestrator,
};
pub use infra::db::*;
pub use infra::pix_gateway::*;
pub use startup::*;
