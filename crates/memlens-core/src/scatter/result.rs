use std::collections::HashMap;

use super::{RemoteValue, RoundKey};
use crate::strings::{StringEncoding, decode_c_string};

/// Results of one executed round.
///
/// Each key succeeds or fails on its own; a missing key means the read was
/// rejected by the address gate, failed in the transport, or came back short.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    values: HashMap<RoundKey, Vec<u8>>,
}

impl ResultSet {
    pub(crate) fn insert(&mut self, key: RoundKey, bytes: Vec<u8>) {
        self.values.insert(key, bytes);
    }

    pub fn try_get<T: RemoteValue>(&self, key: RoundKey) -> Option<T> {
        self.values
            .get(&key)
            .and_then(|bytes| T::from_le_slice(bytes))
    }

    pub fn bytes(&self, key: RoundKey) -> Option<&[u8]> {
        self.values.get(&key).map(Vec::as_slice)
    }

    /// Decode a NUL-terminated string read with `add_bytes`
    pub fn string(&self, key: RoundKey, encoding: StringEncoding) -> Option<String> {
        self.bytes(key).map(|bytes| decode_c_string(bytes, encoding))
    }

    pub fn contains(&self, key: RoundKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
