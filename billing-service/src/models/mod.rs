//! Domain models for billing-service.

pub mod card;
pub mod invoice;
pub mod owner;
pub mod subscription;

pub use card::*;
pub use invoice::*;
pub use owner::*;
pub use subscription::*;
