pub mod driver;
pub mod event;
pub mod order;
pub mod payment;
