pub mod activation;
pub mod direction;
pub mod gradient;
pub mod tensor_extensions;

pub use activation::*;
pub use direction::*;
pub use gradient::*;
pub use tensor_extensions::*;
