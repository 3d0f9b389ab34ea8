mod decoder;
mod encoder;
mod value;

pub use decoder::{decode, decode_prefix};
pub use encoder::encode;
pub use value::BencodeValue;
