mod checkout;
mod contests;
mod discounts;
mod participations;
mod system;

pub use checkout::*;
pub use contests::*;
pub use discounts::*;
pub use participations::*;
pub use system::*;
