pub mod loader;

pub use loader::load_impulse_response;
