use crate::errors::ServiceError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Largest amount a `DECIMAL(16, 4)` money column holds.
pub const MAX_AMOUNT: Decimal = dec!(999999999999.9999);

/// Price breakdown of a single order line.
///
/// `subtotal` and `grand_total` are never stored independently of the
/// components they derive from; every write goes through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPricing {
    pub unit_price: Decimal,
    pub quantity: i32,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
}

impl OrderPricing {
    pub fn new(unit_price: Decimal, quantity: i32) -> Self {
        Self {
            unit_price,
            quantity,
            tax_amount: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
        }
    }

    pub fn with_adjustments(
        mut self,
        tax_amount: Option<Decimal>,
        shipping_cost: Option<Decimal>,
        discount_amount: Option<Decimal>,
    ) -> Self {
        self.tax_amount = tax_amount.unwrap_or(Decimal::ZERO);
        self.shipping_cost = shipping_cost.unwrap_or(Decimal::ZERO);
        self.discount_amount = discount_amount.unwrap_or(Decimal::ZERO);
        self
    }

    pub fn subtotal(&self) -> Result<Decimal, ServiceError> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| overflow("subtotal"))
    }

    pub fn grand_total(&self) -> Result<Decimal, ServiceError> {
        self.subtotal()?
            .checked_add(self.tax_amount)
            .and_then(|t| t.checked_add(self.shipping_cost))
            .and_then(|t| t.checked_sub(self.discount_amount))
            .ok_or_else(|| overflow("grand_total"))
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        for (name, value) in [
            ("unit_price", self.unit_price),
            ("tax_amount", self.tax_amount),
            ("shipping_cost", self.shipping_cost),
            ("discount_amount", self.discount_amount),
        ] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(ServiceError::ValidationError(format!(
                    "{} must not be negative",
                    name
                )));
            }
            ensure_storable(name, value)?;
        }

        ensure_storable("subtotal", self.subtotal()?)?;
        let grand_total = self.grand_total()?;
        if grand_total < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount exceeds order total".to_string(),
            ));
        }
        ensure_storable("grand_total", grand_total)
    }
}

/// Rejects amounts beyond what the money columns store
pub fn ensure_storable(name: &str, value: Decimal) -> Result<(), ServiceError> {
    if value.abs() > MAX_AMOUNT {
        return Err(ServiceError::ValidationError(format!(
            "{} exceeds the maximum amount {}",
            name, MAX_AMOUNT
        )));
    }
    Ok(())
}

fn overflow(name: &str) -> ServiceError {
    ServiceError::ValidationError(format!("{} is out of range", name))
}
