pub mod addresses;
pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_webhooks;

use crate::{
    db::DbPool,
    events::EventSender,
    payments::PaymentProcessor,
    services::{
        addresses::AddressService,
        cart::CartService,
        catalog::ProductCatalogService,
        checkout::{CheckoutService, CheckoutUrls},
        materializer::OrderMaterializer,
        orders::OrderService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<ProductCatalogService>,
    pub cart: Arc<CartService>,
    pub addresses: Arc<AddressService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub materializer: Arc<OrderMaterializer>,
    pub payment_processor: Arc<dyn PaymentProcessor>,
}

impl AppServices {
    /// Wires every service over one pool, one event channel and one processor
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        payment_processor: Arc<dyn PaymentProcessor>,
        checkout_urls: CheckoutUrls,
    ) -> Self {
        let catalog = Arc::new(ProductCatalogService::new(db_pool.clone()));
        let cart = Arc::new(CartService::new(db_pool.clone(), event_sender.clone()));
        let addresses = Arc::new(AddressService::new(db_pool.clone(), event_sender.clone()));
        let orders = Arc::new(OrderService::new(db_pool, event_sender.clone()));

        let checkout = Arc::new(CheckoutService::new(
            catalog.clone(),
            addresses.clone(),
            payment_processor.clone(),
            checkout_urls,
            event_sender.clone(),
        ));
        let materializer = Arc::new(
            OrderMaterializer::new(orders.clone(), cart.clone(), payment_processor.name())
                .with_event_sender(event_sender),
        );

        Self {
            catalog,
            cart,
            addresses,
            orders,
            checkout,
            materializer,
            payment_processor,
        }
    }
}
