use sea_orm::{
    sea_query::{ArrayType, Nullable, ValueType, ValueTypeErr},
    DbErr, QueryResult, TryFromU64, TryGetError, TryGetable, Value,
};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        // SeaORM trait implementations
        impl From<$name> for Value {
            fn from(id: $name) -> Self {
                Value::BigInt(Some(id.0))
            }
        }

        impl TryGetable for $name {
            fn try_get_by<I: sea_orm::ColIdx>(
                res: &QueryResult,
                idx: I,
            ) -> Result<Self, TryGetError> {
                let raw: i64 = i64::try_get_by(res, idx)?;
                Ok(Self(raw))
            }
        }

        impl ValueType for $name {
            fn try_from(v: Value) -> Result<Self, ValueTypeErr> {
                match v {
                    Value::BigInt(Some(raw)) => Ok(Self(raw)),
                    Value::Int(Some(raw)) => Ok(Self(i64::from(raw))),
                    _ => Err(ValueTypeErr),
                }
            }

            fn type_name() -> String {
                stringify!($name).to_owned()
            }

            fn array_type() -> ArrayType {
                ArrayType::BigInt
            }

            fn column_type() -> sea_orm::ColumnType {
                sea_orm::ColumnType::BigInteger
            }
        }

        impl Nullable for $name {
            fn null() -> Value {
                Value::BigInt(None)
            }
        }

        impl TryFromU64 for $name {
            fn try_from_u64(n: u64) -> Result<Self, DbErr> {
                <i64 as TryFrom<u64>>::try_from(n)
                    .map(Self)
                    .map_err(|_| DbErr::ConvertFromU64(stringify!($name)))
            }
        }
    };
}

define_id!(UserId);
define_id!(GroupId);
define_id!(MembershipId);
define_id!(MessageId);
define_id!(EventId);

impl MessageId {
    /// Watermark value for "nothing read yet" / "group has no messages".
    pub const ZERO: MessageId = MessageId(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ordering_follows_raw_value() {
        assert!(MessageId::new(3) > MessageId::new(2));
        assert_eq!(MessageId::ZERO.get(), 0);
    }

    #[test]
    fn test_id_string_conversion() {
        let id = GroupId::new(42);
        let parsed: GroupId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("abc".parse::<GroupId>().is_err());
    }

    #[test]
    fn test_id_serialization() {
        let id = UserId::new(10);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "10");
        let deserialized: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_try_from_u64_rejects_overflow() {
        assert!(MessageId::try_from_u64(u64::MAX).is_err());
        assert_eq!(MessageId::try_from_u64(7).unwrap(), MessageId::new(7));
    }
}
