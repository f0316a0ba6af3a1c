//!
//! Contains wrappers around the logic to encode and decode entity content into bytes, abstracting
//! away the format.
//!

/// Wraps an interface to an encode / decode format
///
/// The bytes produced by a coder are the opaque content of a [RawEntity](crate::RawEntity), so
/// a table must always be read back with the same coder that wrote it.
///
/// NOTE: It's unlikely you will want to implement this trait.  Instead use one of the existing
/// implementations: [BitcodeCoder](crate::BitcodeCoder), [BincodeCoder](crate::BincodeCoder) and
/// [MsgPackCoder](crate::MsgPackCoder), or use [DefaultCoder](crate::DefaultCoder)
pub trait Coder : Clone + Send + Sync + 'static {

    /// Create a new coder
    fn new() -> Self;

    /// Encodes an arbitrary structure to bytes
    fn encode_to_buf<T : serde::ser::Serialize + ?Sized>(&self, obj : &T) -> Result<Vec<u8>, String>;

    /// Decodes an arbitrary structure from bytes
    fn decode_from_bytes<'a, T : serde::de::Deserialize<'a>>(&self, bytes : &'a [u8]) -> Result<T, String>;
}

#[cfg(feature = "bitcode")]
pub(crate) mod bitcode_interface {
    use super::*;

    #[derive(Clone)]
    pub struct BitcodeCoder;

    impl Coder for BitcodeCoder {
        fn new() -> Self {
            Self
        }
        fn encode_to_buf<T : serde::ser::Serialize + ?Sized>(&self, obj : &T) -> Result<Vec<u8>, String> {
            bitcode::serialize(obj).map_err(|e| format!("Encode error: {e}"))
        }
        fn decode_from_bytes<'a, T : serde::de::Deserialize<'a>>(&self, bytes : &'a [u8]) -> Result<T, String> {
            bitcode::deserialize(bytes).map_err(|e| format!("Decode error: {e}"))
        }
    }
}

#[cfg(feature = "bincode")]
pub(crate) mod bincode_interface {
    use super::*;
    use bincode::Options;
    use bincode::config::*;

    #[derive(Clone)]
    pub struct BincodeCoder {
        varint_coder : WithOtherEndian<WithOtherIntEncoding<DefaultOptions, VarintEncoding>, LittleEndian>,
    }

    impl Coder for BincodeCoder {

        fn new() -> Self {
            Self {
                varint_coder : bincode::DefaultOptions::new().with_varint_encoding().with_little_endian(),
            }
        }
        fn encode_to_buf<T : serde::ser::Serialize + ?Sized>(&self, obj : &T) -> Result<Vec<u8>, String> {
            self.varint_coder.serialize(obj).map_err(|e| format!("Encode error: {e}"))
        }
        fn decode_from_bytes<'a, T : serde::de::Deserialize<'a>>(&self, bytes : &'a [u8]) -> Result<T, String> {
            self.varint_coder.deserialize(bytes).map_err(|e| format!("Decode error: {e}"))
        }
    }
}

#[cfg(feature = "msgpack")]
pub(crate) mod msgpack_interface {
    use super::*;

    #[derive(Clone)]
    pub struct MsgPackCoder;

    impl Coder for MsgPackCoder {
        fn new() -> Self {
            Self
        }
        fn encode_to_buf<T : serde::ser::Serialize + ?Sized>(&self, obj : &T) -> Result<Vec<u8>, String> {
            rmp_serde::encode::to_vec(obj).map_err(|e| format!("Encode error: {e}"))
        }
        fn decode_from_bytes<'a, T : serde::de::Deserialize<'a>>(&self, bytes : &'a [u8]) -> Result<T, String> {
            rmp_serde::decode::from_slice(bytes).map_err(|e| format!("Decode error: {e}"))
        }
    }
}
