use integer_encoding::VarInt;

use crate::ActorId;

/// Protocol byte of an ID address.
const ID_PROTOCOL: u8 = 0;

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("failed to encode the address as CBOR: {0}")]
    Cbor(#[from] ciborium::ser::Error<std::io::Error>),
}

/// ID address of an actor (`f0<id>`/`t0<id>`).
///
/// Only the ID protocol is supported, it is the one storage providers are
/// referenced by in the sealing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdAddress(ActorId);

impl IdAddress {
    pub fn new(id: ActorId) -> Self {
        Self(id)
    }

    pub fn id(&self) -> ActorId {
        self.0
    }

    /// Returns the address payload: the protocol byte followed by the
    /// unsigned LEB128 encoding of the actor id.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.0.required_space());
        bytes.push(ID_PROTOCOL);
        bytes.extend_from_slice(&self.0.encode_var_vec());
        bytes
    }

    /// Encodes the address the way it's marshaled on-chain, a CBOR byte string
    /// wrapping [`IdAddress::to_bytes`]. This is the entropy used when drawing
    /// sealing randomness.
    pub fn marshal_cbor(&self) -> Result<Vec<u8>, AddressError> {
        let mut buffer = Vec::new();
        ciborium::into_writer(&ciborium::Value::Bytes(self.to_bytes()), &mut buffer)?;
        Ok(buffer)
    }
}

impl core::fmt::Display for IdAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "t0{}", self.0)
    }
}
