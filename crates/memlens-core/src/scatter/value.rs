/// A fixed-size little-endian value that can be read from the target
pub trait RemoteValue: Sized + Copy {
    /// Bytes occupied in target memory
    const SIZE: usize;

    /// Decode from the first `SIZE` bytes; `None` on a short buffer.
    fn from_le_slice(bytes: &[u8]) -> Option<Self>;

    fn to_le_vec(self) -> Vec<u8>;
}

macro_rules! impl_remote_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl RemoteValue for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn from_le_slice(bytes: &[u8]) -> Option<Self> {
                    let raw = bytes.get(..Self::SIZE)?.try_into().ok()?;
                    Some(<$t>::from_le_bytes(raw))
                }

                fn to_le_vec(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_remote_value!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl RemoteValue for bool {
    const SIZE: usize = 1;

    fn from_le_slice(bytes: &[u8]) -> Option<Self> {
        bytes.first().map(|&b| b != 0)
    }

    fn to_le_vec(self) -> Vec<u8> {
        vec![self as u8]
    }
}

impl<const N: usize> RemoteValue for [u8; N] {
    const SIZE: usize = N;

    fn from_le_slice(bytes: &[u8]) -> Option<Self> {
        bytes.get(..N)?.try_into().ok()
    }

    fn to_le_vec(self) -> Vec<u8> {
        self.to_vec()
    }
}
