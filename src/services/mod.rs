// Storefront state
pub mod addresses;
pub mod cart;
pub mod catalog;

// Orders and their lifecycle
pub mod order_status;
pub mod orders;
pub mod pricing;

// Checkout and payment reconciliation
pub mod checkout;
pub mod materializer;
