use chrono::Utc;
use serde::Deserialize;

use kestrel_core::{AggregateId, TenantId};
use kestrel_products::{
    ArchiveProduct, CreateProduct, Pricing, Product, ProductCommand, ProductId, ProductType,
    RestoreProduct, UpdateProduct,
};

use super::{found, listed, required, ServiceResult, Services};
use crate::command_dispatcher::DispatchError;
use crate::projections::Snapshot;

#[derive(Debug, Clone, Deserialize)]
pub struct ProductInput {
    pub sku: String,
    pub name: String,
    #[serde(rename = "type", default = "default_product_type")]
    pub product_type: ProductType,
    #[serde(default)]
    pub sales_price: i64,
    #[serde(default)]
    pub cost: i64,
}

fn default_product_type() -> ProductType {
    ProductType::Goods
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub sales_price: Option<i64>,
    pub cost: Option<i64>,
}

impl Services {
    /// SKUs are unique per company, case-insensitively.
    pub fn create_product(&self, tenant_id: TenantId, input: ProductInput) -> ServiceResult<Snapshot<Product>> {
        let product_id = ProductId::new(AggregateId::new());
        self.write(|s| {
            let sku = required("sku", &input.sku)?;
            let taken = s
                .views()
                .products
                .list(tenant_id)
                .iter()
                .any(|p| p.aggregate.sku().eq_ignore_ascii_case(&sku));
            if taken {
                return Err(DispatchError::field("sku", "the SKU has already been taken"));
            }

            s.execute::<Product>(
                tenant_id,
                product_id.0,
                ProductCommand::Create(CreateProduct {
                    tenant_id,
                    product_id,
                    sku,
                    name: input.name.clone(),
                    product_type: input.product_type,
                    pricing: Pricing {
                        sales_price: input.sales_price,
                        cost: input.cost,
                    },
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.product(tenant_id, product_id)
    }

    pub fn update_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        changes: ProductChanges,
    ) -> ServiceResult<Snapshot<Product>> {
        let current = self.product(tenant_id, product_id)?.aggregate.pricing();
        let pricing = (changes.sales_price.is_some() || changes.cost.is_some()).then(|| Pricing {
            sales_price: changes.sales_price.unwrap_or(current.sales_price),
            cost: changes.cost.unwrap_or(current.cost),
        });

        self.write(|s| {
            s.execute::<Product>(
                tenant_id,
                product_id.0,
                ProductCommand::Update(UpdateProduct {
                    tenant_id,
                    product_id,
                    name: changes.name,
                    pricing,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.product(tenant_id, product_id)
    }

    pub fn archive_product(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<Snapshot<Product>> {
        self.write(|s| {
            s.execute::<Product>(
                tenant_id,
                product_id.0,
                ProductCommand::Archive(ArchiveProduct {
                    tenant_id,
                    product_id,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.product(tenant_id, product_id)
    }

    pub fn restore_product(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<Snapshot<Product>> {
        self.write(|s| {
            s.execute::<Product>(
                tenant_id,
                product_id.0,
                ProductCommand::Restore(RestoreProduct {
                    tenant_id,
                    product_id,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.product(tenant_id, product_id)
    }

    pub fn product(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<Snapshot<Product>> {
        found(&self.views().products, tenant_id, product_id.0)
    }

    pub fn products(&self, tenant_id: TenantId) -> Vec<Snapshot<Product>> {
        listed(&self.views().products, tenant_id)
    }

    /// An active product that may be bought or sold.
    pub(crate) fn sellable(&self, tenant_id: TenantId, product_id: ProductId, field: &'static str) -> ServiceResult<Product> {
        let product = self
            .views()
            .products
            .get(tenant_id, product_id.0)
            .ok_or_else(|| DispatchError::field(field, "the selected product does not exist"))?
            .aggregate;
        if product.is_archived() {
            return Err(DispatchError::field(field, "the selected product is archived"));
        }
        Ok(product)
    }

    /// An active goods product, the only kind stock moves may carry.
    pub(crate) fn storable(&self, tenant_id: TenantId, product_id: ProductId, field: &'static str) -> ServiceResult<Product> {
        let product = self.sellable(tenant_id, product_id, field)?;
        if !product.is_storable() {
            return Err(DispatchError::field(field, "services cannot be moved in stock operations"));
        }
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desk(sku: &str) -> ProductInput {
        ProductInput {
            sku: sku.to_string(),
            name: "Office Desk".to_string(),
            product_type: ProductType::Goods,
            sales_price: 25_000,
            cost: 18_000,
        }
    }

    #[test]
    fn duplicate_skus_are_rejected_per_company() {
        let services = Services::in_memory();
        let tenant = TenantId::new();
        services.create_product(tenant, desk("DESK-001")).unwrap();

        let err = services.create_product(tenant, desk("desk-001")).unwrap_err();
        assert!(matches!(err, DispatchError::Validation { field: Some("sku"), .. }));

        assert!(services.create_product(TenantId::new(), desk("DESK-001")).is_ok());
    }

    #[test]
    fn partial_price_updates_keep_the_other_price() {
        let services = Services::in_memory();
        let tenant = TenantId::new();
        let id = services.create_product(tenant, desk("DESK-001")).unwrap().aggregate.id_typed();

        let updated = services
            .update_product(
                tenant,
                id,
                ProductChanges {
                    cost: Some(19_500),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.aggregate.pricing(), Pricing { sales_price: 25_000, cost: 19_500 });
    }

    #[test]
    fn services_are_not_storable() {
        let services = Services::in_memory();
        let tenant = TenantId::new();
        let id = services
            .create_product(
                tenant,
                ProductInput {
                    product_type: ProductType::Service,
                    ..desk("INSTALL")
                },
            )
            .unwrap()
            .aggregate
            .id_typed();

        assert!(services.sellable(tenant, id, "product_id").is_ok());
        assert!(matches!(
            services.storable(tenant, id, "product_id"),
            Err(DispatchError::Validation { field: Some("product_id"), .. })
        ));
    }
}
