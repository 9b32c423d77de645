//! Property-based tests for the cart, invoice building and gateway signing.

use std::collections::HashMap;

use bookstore_orders::entities::{PaymentMethod, PaymentStatus};
use bookstore_orders::models::{Cart, CartItem};
use bookstore_orders::services::orders::build_invoice;
use bookstore_orders::services::payment_gateway::{canonical_string, gateway_amount, sign, verify};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..5_000_000, 0u32..3).prop_map(|(units, scale)| Decimal::new(units, scale))
}

/// (book index into a small pool, quantity, price) so the same book shows up
/// more than once.
fn cart_ops_strategy() -> impl Strategy<Value = Vec<(usize, i32, Decimal)>> {
    prop::collection::vec((0usize..5, 1i32..20, price_strategy()), 0..30)
}

fn book_pool() -> Vec<Uuid> {
    (0..5).map(|_| Uuid::new_v4()).collect()
}

fn build_cart(pool: &[Uuid], ops: &[(usize, i32, Decimal)]) -> Cart {
    let mut cart = Cart::new();
    for (idx, qty, price) in ops {
        cart.add_item(CartItem::new(pool[*idx], format!("Book {}", idx), *price, *qty));
    }
    cart
}

fn as_pairs(fields: &[(String, String)]) -> Vec<(&str, String)> {
    fields.iter().map(|(k, v)| (k.as_str(), v.clone())).collect()
}

// Property: a cart never holds two lines for the same book
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn cart_lines_are_unique_and_quantities_add_up(ops in cart_ops_strategy()) {
        let pool = book_pool();
        let cart = build_cart(&pool, &ops);

        let mut expected: HashMap<Uuid, i32> = HashMap::new();
        for (idx, qty, _) in &ops {
            *expected.entry(pool[*idx]).or_default() += qty;
        }

        prop_assert_eq!(cart.len(), expected.len());
        for item in cart.items() {
            prop_assert_eq!(Some(&item.quantity), expected.get(&item.book_id));
        }
        let total: i64 = ops.iter().map(|(_, q, _)| i64::from(*q)).sum();
        prop_assert_eq!(cart.total_quantity(), total);
    }

    #[test]
    fn cart_keeps_first_insertion_order(ops in cart_ops_strategy()) {
        let pool = book_pool();
        let cart = build_cart(&pool, &ops);

        let mut first_seen: Vec<Uuid> = Vec::new();
        for (idx, _, _) in &ops {
            if !first_seen.contains(&pool[*idx]) {
                first_seen.push(pool[*idx]);
            }
        }
        let ids: Vec<Uuid> = cart.items().iter().map(|i| i.book_id).collect();
        prop_assert_eq!(ids, first_seen);
    }

    #[test]
    fn removing_a_book_removes_only_that_line(ops in cart_ops_strategy(), victim in 0usize..5) {
        let pool = book_pool();
        let mut cart = build_cart(&pool, &ops);
        let before = cart.len();
        let present = cart.get(pool[victim]).is_some();

        prop_assert_eq!(cart.remove_item(pool[victim]), present);
        prop_assert!(cart.get(pool[victim]).is_none());
        prop_assert_eq!(cart.len(), if present { before - 1 } else { before });
    }
}

// Property: an invoice mirrors the cart it was built from
proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn invoice_total_and_lines_match_cart(ops in cart_ops_strategy(), wallet in any::<bool>()) {
        let pool = book_pool();
        let cart = build_cart(&pool, &ops);
        let method = if wallet { PaymentMethod::Wallet } else { PaymentMethod::Cod };

        let invoice = build_invoice("u-1", &cart, method);
        let lines = invoice.lines.clone().unwrap().0;

        prop_assert_eq!(invoice.total_price.clone().unwrap(), cart.total_price());
        prop_assert_eq!(lines.len(), cart.len());
        for (line, item) in lines.iter().zip(cart.items()) {
            prop_assert_eq!(line.book_id, item.book_id);
            prop_assert_eq!(line.quantity, item.quantity);
        }

        let expected_status = if wallet { PaymentStatus::PendingPayment } else { PaymentStatus::CodPending };
        prop_assert_eq!(invoice.payment_status.clone().unwrap(), expected_status);
    }
}

// Property: gateway amounts and signatures
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn gateway_amount_is_within_half_a_unit(total in price_strategy()) {
        let amount = gateway_amount(total).unwrap();
        let diff = (Decimal::from(amount) - total).abs();
        prop_assert!(diff <= Decimal::new(5, 1), "{} rounded to {}", total, amount);
    }

    #[test]
    fn canonical_string_ignores_field_order(
        mut fields in prop::collection::btree_map("[a-z]{1,8}", "[A-Za-z0-9]{0,12}", 1..8)
            .prop_map(|m| m.into_iter().collect::<Vec<_>>()),
        seed in any::<u64>(),
    ) {
        let sorted = canonical_string(&as_pairs(&fields));

        let len = fields.len();
        fields.rotate_left((seed as usize) % len);
        prop_assert_eq!(canonical_string(&as_pairs(&fields)), sorted);
    }

    #[test]
    fn signature_verifies_only_the_signed_payload(
        raw in "[ -~]{0,64}",
        other in "[ -~]{0,64}",
        secret in "[A-Za-z0-9]{8,32}",
    ) {
        let signature = sign(&secret, &raw);
        prop_assert!(verify(&secret, &raw, &signature));
        if other != raw {
            prop_assert!(!verify(&secret, &other, &signature));
        }
    }
}
