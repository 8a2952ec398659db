//! Commands for the Product context.

use catalog_core::command::Command;
use uuid::Uuid;

/// Command to add a product to the catalog.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Identifier of the new product.
    pub product_id: Uuid,
    /// Stock keeping unit.
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Price in minor currency units.
    pub price_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
}

/// Command to reprice a product.
#[derive(Debug, Clone)]
pub struct ChangePrice {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The product to reprice.
    pub product_id: Uuid,
    /// New price in minor currency units.
    pub new_price_cents: i64,
}

/// Command to withdraw a product from sale.
#[derive(Debug, Clone)]
pub struct DiscontinueProduct {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The product to discontinue.
    pub product_id: Uuid,
    /// Optional free-text reason.
    pub reason: Option<String>,
}

impl Command for CreateProduct {
    fn command_type(&self) -> &'static str {
        "product.create_product"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.product_id
    }
}

impl Command for ChangePrice {
    fn command_type(&self) -> &'static str {
        "product.change_price"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.product_id
    }
}

impl Command for DiscontinueProduct {
    fn command_type(&self) -> &'static str {
        "product.discontinue_product"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.product_id
    }
}
