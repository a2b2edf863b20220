/// Implements a 128-bit opaque identifier with a lower-case hex wire form.
macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; 16]);

        impl $name {
            pub fn new(b: [u8; 16]) -> Self {
                Self(b)
            }
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 16]
            }
            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }
            pub fn from_hex<T: AsRef<[u8]>>(hex: T) -> Result<Self, hex::FromHexError> {
                let vec_bytes = hex::decode(hex)?;
                let exact: [u8; 16] = vec_bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;

                Ok(Self(exact))
            }
            pub fn to_uuid(&self) -> uuid::Uuid {
                uuid::Uuid::from_bytes(self.0)
            }
            pub fn from_uuid(u: uuid::Uuid) -> Self {
                Self(u.into_bytes())
            }
        }

        impl std::str::FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                <Self as std::fmt::Display>::fmt(self, f)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                use serde::de::Error;
                let str_val = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
                Self::from_hex(str_val.as_ref())
                    .map_err(|err| D::Error::custom(format!("invalid id: {err}")))
            }
        }
    };
}

opaque_id!(FeedId);
opaque_id!(MessageId);

/// Address identifies a participant by their public signing key,
/// in the printable form produced by the chain.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn feed_id_hex_round_trip() {
        let id = FeedId::new([
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ]);
        assert_eq!(id.to_string(), "00112233445566778899aabbccddeeff");
        assert_eq!(
            "00112233445566778899aabbccddeeff".parse::<FeedId>().unwrap(),
            id
        );
        assert_eq!(FeedId::from_uuid(id.to_uuid()), id);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(FeedId::from_hex("not-hex").is_err());
        assert!(FeedId::from_hex("001122").is_err());
        assert!(MessageId::from_hex("zz112233445566778899aabbccddeeff").is_err());
    }

    #[test]
    fn id_serde_uses_hex_string() {
        let id = MessageId::new([1u8; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"01010101010101010101010101010101\"");
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
