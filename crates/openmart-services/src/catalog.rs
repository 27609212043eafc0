//! Product catalog service.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use openmart_cache::{CacheStore, EntityChange, InvalidationCoordinator, keys};
use openmart_core::{CoreError, Product, ProductId, Result};
use openmart_storage::{ProductPatch, ProductStore};

/// Input for creating a catalog product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub wholesale_price: f64,
    pub retail_price: f64,
    pub stock: i32,
}

pub struct ProductCatalog {
    products: Arc<dyn ProductStore>,
    cache: CacheStore,
    invalidation: InvalidationCoordinator,
    product_ttl: Duration,
}

impl ProductCatalog {
    pub fn new(
        products: Arc<dyn ProductStore>,
        cache: CacheStore,
        invalidation: InvalidationCoordinator,
        product_ttl: Duration,
    ) -> Self {
        Self {
            products,
            cache,
            invalidation,
            product_ttl,
        }
    }

    pub async fn save(&self, new: NewProduct) -> Result<Product> {
        if new.stock < 0 {
            return Err(CoreError::invalid_entity("stock must not be negative"));
        }
        let now = OffsetDateTime::now_utc();
        let product = self
            .products
            .save(Product {
                id: 0,
                name: new.name,
                description: new.description,
                wholesale_price: new.wholesale_price,
                retail_price: new.retail_price,
                stock: new.stock,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(CoreError::from)?;

        self.invalidation
            .invalidate(&EntityChange::ProductCreated {
                product_id: product.id,
            })
            .await;

        Ok(product)
    }

    /// Apply a partial update; unset fields keep their current values.
    pub async fn update_fields(&self, product_id: ProductId, patch: ProductPatch) -> Result<Product> {
        let mut existing = self
            .products
            .find_by_id(product_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("Product", product_id))?;

        let mut stock_changed = false;
        if let Some(name) = patch.name {
            existing.name = name;
        }
        if let Some(description) = patch.description {
            existing.description = description;
        }
        if let Some(wholesale) = patch.wholesale_price {
            existing.wholesale_price = wholesale;
        }
        if let Some(retail) = patch.retail_price {
            existing.retail_price = retail;
        }
        if let Some(stock) = patch.stock {
            if stock < 0 {
                return Err(CoreError::invalid_entity("stock must not be negative"));
            }
            stock_changed = existing.stock != stock;
            existing.stock = stock;
        }

        let updated = self
            .products
            .update(existing)
            .await
            .map_err(CoreError::from)?;

        self.invalidation
            .invalidate(&EntityChange::ProductUpdated {
                product_id,
                stock_changed,
            })
            .await;

        Ok(updated)
    }

    pub async fn find_by_id(&self, product_id: ProductId) -> Result<Option<Product>> {
        let key = keys::products::by_id(product_id);
        if let Some(product) = self.cache.get::<Product>(&key).await {
            tracing::debug!(product_id, "cache hit for product");
            return Ok(Some(product));
        }

        let product = self
            .products
            .find_by_id(product_id)
            .await
            .map_err(CoreError::from)?;
        if let Some(ref product) = product {
            self.cache.set(&key, product, self.product_ttl).await;
        }
        Ok(product)
    }

    pub async fn find_all(&self) -> Result<Vec<Product>> {
        if let Some(products) = self.cache.get_list::<Product>(keys::products::ALL).await {
            return Ok(products);
        }
        let products = self.products.find_all().await.map_err(CoreError::from)?;
        self.cache
            .set(keys::products::ALL, &products, self.product_ttl)
            .await;
        Ok(products)
    }

    pub async fn find_in_stock(&self) -> Result<Vec<Product>> {
        if let Some(products) = self
            .cache
            .get_list::<Product>(keys::products::IN_STOCK)
            .await
        {
            return Ok(products);
        }
        let products = self
            .products
            .find_in_stock()
            .await
            .map_err(CoreError::from)?;
        self.cache
            .set(keys::products::IN_STOCK, &products, self.product_ttl)
            .await;
        Ok(products)
    }
}
