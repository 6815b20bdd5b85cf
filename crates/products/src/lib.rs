//! Products domain module (event-sourced).
//!
//! Business rules for the product catalogue, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod product;

pub use product::{
    ArchiveProduct, CreateProduct, Pricing, Product, ProductArchived, ProductCommand,
    ProductCreated, ProductEvent, ProductId, ProductRestored, ProductType, ProductUpdated,
    RestoreProduct, UpdateProduct,
};
