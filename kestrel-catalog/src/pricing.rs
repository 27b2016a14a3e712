use std::collections::{HashMap, HashSet};
use rust_decimal::Decimal;
use kestrel_core::catalog::Product;
use kestrel_core::{OrderItem, OrderLine, ProductId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("Products not found: {}", .0.join(", "))]
    MissingProducts(Vec<ProductId>),

    /// The catalog quoted a price no order may carry.
    #[error("Catalog quoted invalid price {price} for product {product_id}")]
    InvalidPrice { product_id: ProductId, price: Decimal },
}

impl PricingError {
    /// True when the catalog answer itself is at fault rather than the request.
    pub fn is_catalog_fault(&self) -> bool {
        matches!(self, PricingError::InvalidPrice { .. })
    }
}

/// Catalog answer for one order, keyed by product id.
///
/// Built fresh for every order so prices are a point-in-time snapshot.
#[derive(Debug, Clone, Default)]
pub struct PriceSheet {
    products: HashMap<ProductId, Product>,
}

impl PriceSheet {
    pub fn new(products: Vec<Product>) -> Self {
        let products = products
            .into_iter()
            .map(|product| (product.id.clone(), product))
            .collect();
        Self { products }
    }

    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.products.get(id).map(|p| p.name.as_str())
    }

    /// Requested ids the catalog did not return, in request order.
    pub fn missing(&self, ids: &[ProductId]) -> Vec<ProductId> {
        ids.iter()
            .filter(|id| !self.products.contains_key(id.as_str()))
            .cloned()
            .collect()
    }

    /// Price every requested line, or fail if any product is unknown or
    /// quoted below zero.
    ///
    /// Items carry the catalog's unit price and name. Caller-supplied prices
    /// do not exist in `OrderLine`, so nothing else can leak in.
    pub fn price_lines(&self, lines: &[OrderLine]) -> Result<Vec<OrderItem>, PricingError> {
        let missing = self.missing(&distinct_ids(lines));
        if !missing.is_empty() {
            return Err(PricingError::MissingProducts(missing));
        }

        for line in lines {
            if let Some(product) = self.get(&line.product_id) {
                if product.price < Decimal::ZERO {
                    return Err(PricingError::InvalidPrice {
                        product_id: product.id.clone(),
                        price: product.price,
                    });
                }
            }
        }

        Ok(lines
            .iter()
            .filter_map(|line| {
                self.get(&line.product_id).map(|product| OrderItem {
                    product_id: line.product_id.clone(),
                    price: product.price,
                    quantity: line.quantity,
                    name: Some(product.name.clone()),
                })
            })
            .collect())
    }
}

/// Distinct product ids of the requested lines, first occurrence first.
pub fn distinct_ids(lines: &[OrderLine]) -> Vec<ProductId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for line in lines {
        if seen.insert(line.product_id.as_str()) {
            ids.push(line.product_id.clone());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(product_id: &str, quantity: u32) -> OrderLine {
        OrderLine {
            product_id: product_id.to_string(),
            quantity,
        }
    }

    fn product(id: &str, name: &str, price: rust_decimal::Decimal) -> Product {
        Product {
            id: id.to_string(),
            name: name.to_string(),
            price,
        }
    }

    #[test]
    fn test_distinct_ids_keeps_first_occurrence() {
        let ids = distinct_ids(&[line("p2", 1), line("p1", 1), line("p2", 4)]);
        assert_eq!(ids, vec!["p2".to_string(), "p1".to_string()]);
    }

    #[test]
    fn test_price_lines_uses_catalog_prices() {
        let sheet = PriceSheet::new(vec![
            product("p1", "Widget", dec!(5.00)),
            product("p2", "Gadget", dec!(2.50)),
        ]);

        let items = sheet.price_lines(&[line("p1", 2), line("p2", 1)]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].price, dec!(5.00));
        assert_eq!(items[0].name.as_deref(), Some("Widget"));
        assert_eq!(items[1].line_total(), Some(dec!(2.50)));
    }

    #[test]
    fn test_price_lines_is_all_or_nothing() {
        let sheet = PriceSheet::new(vec![product("p1", "Widget", dec!(5.00))]);

        let err = sheet
            .price_lines(&[line("p1", 1), line("p9", 1), line("p8", 2)])
            .unwrap_err();
        assert_eq!(
            err,
            PricingError::MissingProducts(vec!["p9".to_string(), "p8".to_string()])
        );
        assert_eq!(err.to_string(), "Products not found: p9, p8");
    }

    #[test]
    fn test_negative_catalog_price_is_rejected() {
        let sheet = PriceSheet::new(vec![
            product("p1", "Widget", dec!(5.00)),
            product("p2", "Refund", dec!(-5.00)),
        ]);

        let err = sheet.price_lines(&[line("p1", 1), line("p2", 2)]).unwrap_err();
        assert_eq!(
            err,
            PricingError::InvalidPrice { product_id: "p2".to_string(), price: dec!(-5.00) }
        );
        assert!(err.is_catalog_fault());
        assert!(!PricingError::MissingProducts(vec![]).is_catalog_fault());

        let free = PriceSheet::new(vec![product("p0", "Sticker", dec!(0))]);
        assert!(free.price_lines(&[line("p0", 1)]).is_ok());
    }

    #[test]
    fn test_extra_catalog_records_are_ignored() {
        let sheet = PriceSheet::new(vec![
            product("p1", "Widget", dec!(1)),
            product("p2", "Unrequested", dec!(99)),
        ]);
        let items = sheet.price_lines(&[line("p1", 3)]).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, "p1");
    }
}
