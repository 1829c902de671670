//! Catalog domain module: products and their reviews.
//!
//! This crate contains the records, creation inputs and partial-update rules for the
//! catalog, implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod product;
pub mod rating;
pub mod review;

pub use product::{NewProduct, Product, ProductPatch};
pub use rating::{average_of, average_rating};
pub use review::{NewReview, Review, ReviewPatch};
