pub mod encoding;
pub mod serde_helpers;

pub use encoding::encode_component;
pub use serde_helpers::strip_braces;
