use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo};
use sqlx::{Database, Decode, Encode, Sqlite, Type};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HexParseError {
    #[error("expected {expected} hex digits, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("invalid hex digit: {0}")]
    Digit(#[from] hex::FromHexError),
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], HexParseError> {
    let s = s.trim();
    if s.len() != N * 2 {
        return Err(HexParseError::Length {
            expected: N * 2,
            actual: s.len(),
        });
    }
    let mut buf = [0u8; N];
    hex::decode_to_slice(s, &mut buf)?;
    Ok(buf)
}

/// 64-bit extended unique identifier of a gateway, the primary key of every lookup.
///
/// Text form is 16 hex digits without separators, e.g. `0102030405060708`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
#[repr(transparent)]
pub struct Eui64([u8; 8]);

#[cfg(test)]
impl Eui64 {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl FromStr for Eui64 {
    type Err = HexParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<8>(s).map(Self)
    }
}

impl Display for Eui64 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Type<Sqlite> for Eui64 {
    fn type_info() -> SqliteTypeInfo {
        <[u8] as Type<Sqlite>>::type_info()
    }
    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <[u8] as Type<Sqlite>>::compatible(ty)
    }
}
impl<'q> Encode<'q, Sqlite> for Eui64 {
    fn encode_by_ref(
        &self,
        buf: &mut <Sqlite as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        buf.push(SqliteArgumentValue::Blob(Cow::Owned(self.0.to_vec())));
        Ok(IsNull::No)
    }
}
impl Decode<'_, Sqlite> for Eui64 {
    fn decode(value: <Sqlite as Database>::ValueRef<'_>) -> Result<Self, BoxDynError> {
        let bytes = <&[u8] as Decode<Sqlite>>::decode(value)?;
        Ok(Self(bytes.try_into()?))
    }
}

/// 128-bit MD5 content hash used to compare configs and firmware images
/// without transferring them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
#[repr(transparent)]
pub struct Md5Sum([u8; 16]);

impl Md5Sum {
    pub const ZERO: Md5Sum = Md5Sum([0; 16]);

    /// digest of `data`
    pub fn of(data: impl AsRef<[u8]>) -> Self {
        use md5::{Digest, Md5};
        Self(Md5::digest(data.as_ref()).into())
    }
    #[cfg(test)]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl FromStr for Md5Sum {
    type Err = HexParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<16>(s).map(Self)
    }
}

impl Display for Md5Sum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Type<Sqlite> for Md5Sum {
    fn type_info() -> SqliteTypeInfo {
        <[u8] as Type<Sqlite>>::type_info()
    }
    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <[u8] as Type<Sqlite>>::compatible(ty)
    }
}
impl<'q> Encode<'q, Sqlite> for Md5Sum {
    fn encode_by_ref(
        &self,
        buf: &mut <Sqlite as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        buf.push(SqliteArgumentValue::Blob(Cow::Owned(self.0.to_vec())));
        Ok(IsNull::No)
    }
}
impl Decode<'_, Sqlite> for Md5Sum {
    fn decode(value: <Sqlite as Database>::ValueRef<'_>) -> Result<Self, BoxDynError> {
        let bytes = <&[u8] as Decode<Sqlite>>::decode(value)?;
        // rows created before a firmware was ever pushed carry an empty blob
        if bytes.is_empty() {
            return Ok(Self::ZERO);
        }
        Ok(Self(bytes.try_into()?))
    }
}
