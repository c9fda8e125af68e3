//! Property-based tests for pricing, status transitions and webhook signatures.

use std::time::Duration;

use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_api::{
    entities::order::{OrderStatus, PaymentStatus},
    payments::{
        signature::{compute_signature, verify_signature},
        split_product_ids, CheckoutMetadata, PRODUCT_IDS_KEY,
    },
    services::{order_status::is_valid_order_transition, pricing::OrderPricing},
};
use uuid::Uuid;

fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn order_status_strategy() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::Pending),
        Just(OrderStatus::Confirmed),
        Just(OrderStatus::Processing),
        Just(OrderStatus::Shipped),
        Just(OrderStatus::Delivered),
        Just(OrderStatus::Cancelled),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn grand_total_is_the_sum_of_its_parts(
        unit_price in money_strategy(),
        quantity in 1i32..10_000,
        tax in money_strategy(),
        shipping in money_strategy(),
        discount in money_strategy(),
    ) {
        let pricing = OrderPricing::new(unit_price, quantity)
            .with_adjustments(Some(tax), Some(shipping), Some(discount));

        let subtotal = pricing.subtotal().unwrap();
        let grand_total = pricing.grand_total().unwrap();
        prop_assert_eq!(subtotal, unit_price * Decimal::from(quantity));
        prop_assert_eq!(grand_total, subtotal + tax + shipping - discount);
        prop_assert_eq!(pricing.validate().is_ok(), grand_total >= Decimal::ZERO);
    }

    #[test]
    fn oversized_components_are_rejected_without_panicking(
        quantity in 1i32..=i32::MAX,
        tax in any::<i64>(),
        scale in 0u32..=10,
    ) {
        let tax = Decimal::new(tax, scale).abs();
        let pricing = OrderPricing::new(Decimal::MAX, quantity)
            .with_adjustments(Some(tax), Some(Decimal::MAX), None);
        prop_assert!(pricing.validate().is_err());
    }

    #[test]
    fn non_positive_quantities_never_price(
        unit_price in money_strategy(),
        quantity in -1_000i32..=0,
    ) {
        prop_assert!(OrderPricing::new(unit_price, quantity).validate().is_err());
    }

    #[test]
    fn terminal_statuses_only_stay_put(to in order_status_strategy()) {
        for terminal in [OrderStatus::Delivered, OrderStatus::Cancelled] {
            prop_assert_eq!(is_valid_order_transition(terminal, to), terminal == to);
        }
    }

    #[test]
    fn no_status_returns_to_pending(from in order_status_strategy()) {
        prop_assert_eq!(
            is_valid_order_transition(from, OrderStatus::Pending),
            from == OrderStatus::Pending
        );
    }

    #[test]
    fn signed_payloads_verify_and_tampered_ones_do_not(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        secret in "[a-zA-Z0-9_]{8,40}",
        timestamp in 1_600_000_000i64..2_000_000_000,
        skew in -300i64..=300,
    ) {
        let header = format!("t={},v1={}", timestamp, compute_signature(timestamp, &payload, &secret));
        let tolerance = Duration::from_secs(300);

        prop_assert!(verify_signature(&header, &payload, &secret, tolerance, timestamp + skew).is_ok());

        let mut tampered = payload.clone();
        tampered.push(b'!');
        prop_assert!(verify_signature(&header, &tampered, &secret, tolerance, timestamp).is_err());
        prop_assert!(verify_signature(&header, &payload, "other-secret", tolerance, timestamp).is_err());
    }

    #[test]
    fn product_ids_survive_metadata_encoding(count in 1usize..=13) {
        let product_ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
        let metadata = CheckoutMetadata {
            shopper_id: Uuid::new_v4(),
            address_id: Uuid::new_v4(),
            product_ids: product_ids.clone(),
        }
        .to_map()
        .unwrap();

        let decoded: Vec<Uuid> = split_product_ids(&metadata[PRODUCT_IDS_KEY])
            .map(|id| Uuid::parse_str(id).unwrap())
            .collect();
        prop_assert_eq!(decoded, product_ids);
    }
}

#[test]
fn refunds_only_follow_payment() {
    use storefront_api::services::order_status::is_valid_payment_transition;

    assert!(is_valid_payment_transition(PaymentStatus::Paid, PaymentStatus::Refunded));
    assert!(!is_valid_payment_transition(PaymentStatus::Pending, PaymentStatus::Refunded));
    assert!(!is_valid_payment_transition(PaymentStatus::Refunded, PaymentStatus::Paid));
}
