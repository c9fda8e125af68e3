pub mod address;
pub mod cart_item;
pub mod order;
pub mod payment_session_receipt;
pub mod product;
pub mod shopper_address;
