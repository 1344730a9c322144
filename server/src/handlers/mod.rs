pub mod health_handlers;
pub mod tryon_handlers;
