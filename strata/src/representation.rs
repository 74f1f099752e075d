//! Element types and sampling schemas for catalog resources.
//!
//! A [`Representation`] is one samplable time series of a resource: a
//! numeric [`DataType`] and a fixed sampling period. The period determines
//! how many ticks a read window holds, the data type determines how many
//! bytes each tick occupies in the caller's data buffer.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result, StrataError};

/// Nanoseconds per representation id unit, largest first.
const ID_UNITS: [(u64, &str); 5] = [
    (60_000_000_000, "min"),
    (1_000_000_000, "s"),
    (1_000_000, "ms"),
    (1_000, "us"),
    (1, "ns"),
];

/// Numeric element type of a representation.
///
/// Each type has a stable numeric [`code`](DataType::code): the low byte is
/// the bit width and the high nibble the kind (1 = unsigned integer,
/// 2 = signed integer, 3 = floating point).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 64-bit integer.
    Uint64,
    /// Signed 64-bit integer.
    Int64,
    /// IEEE 754 single precision.
    Float32,
    /// IEEE 754 double precision.
    Float64,
}

impl DataType {
    /// All element types, ordered by code.
    pub const ALL: [DataType; 10] = [
        Self::Uint8,
        Self::Uint16,
        Self::Uint32,
        Self::Uint64,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Float32,
        Self::Float64,
    ];

    /// Returns the stable numeric code of this type.
    pub fn code(self) -> u16 {
        match self {
            Self::Uint8 => 0x108,
            Self::Uint16 => 0x110,
            Self::Uint32 => 0x120,
            Self::Uint64 => 0x140,
            Self::Int8 => 0x208,
            Self::Int16 => 0x210,
            Self::Int32 => 0x220,
            Self::Int64 => 0x240,
            Self::Float32 => 0x320,
            Self::Float64 => 0x340,
        }
    }

    /// Looks up a type by its numeric code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Returns the size of one element in bytes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strata::representation::DataType;
    ///
    /// assert_eq!(DataType::Uint8.size(), 1);
    /// assert_eq!(DataType::Float32.size(), 4);
    /// assert_eq!(DataType::Int64.size(), 8);
    /// ```
    pub fn size(self) -> usize {
        usize::from(self.code() & 0xFF) / 8
    }

    /// Returns `true` for `FLOAT32` and `FLOAT64`.
    pub fn is_float(self) -> bool {
        self.code() >> 8 == 3
    }

    /// Writes `value` as one little-endian element of this type into `out`.
    ///
    /// Integer types saturate at their bounds; NaN becomes zero. `out`
    /// must be exactly [`size`](DataType::size) bytes long.
    ///
    /// # Panics
    ///
    /// Panics if `out.len() != self.size()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strata::representation::DataType;
    ///
    /// let mut out = [0u8; 2];
    /// DataType::Int16.encode_into(-2.0, &mut out);
    /// assert_eq!(i16::from_le_bytes(out), -2);
    /// ```
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // saturating by design of `as`
    pub fn encode_into(self, value: f64, out: &mut [u8]) {
        match self {
            Self::Uint8 => out.copy_from_slice(&(value as u8).to_le_bytes()),
            Self::Int8 => out.copy_from_slice(&(value as i8).to_le_bytes()),
            Self::Uint16 => out.copy_from_slice(&(value as u16).to_le_bytes()),
            Self::Int16 => out.copy_from_slice(&(value as i16).to_le_bytes()),
            Self::Uint32 => out.copy_from_slice(&(value as u32).to_le_bytes()),
            Self::Int32 => out.copy_from_slice(&(value as i32).to_le_bytes()),
            Self::Uint64 => out.copy_from_slice(&(value as u64).to_le_bytes()),
            Self::Int64 => out.copy_from_slice(&(value as i64).to_le_bytes()),
            Self::Float32 => out.copy_from_slice(&(value as f32).to_le_bytes()),
            Self::Float64 => out.copy_from_slice(&value.to_le_bytes()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uint8 => "UINT8",
            Self::Int8 => "INT8",
            Self::Uint16 => "UINT16",
            Self::Int16 => "INT16",
            Self::Uint32 => "UINT32",
            Self::Int32 => "INT32",
            Self::Uint64 => "UINT64",
            Self::Int64 => "INT64",
            Self::Float32 => "FLOAT32",
            Self::Float64 => "FLOAT64",
        };
        f.write_str(name)
    }
}

/// One concrete sampling schema of a resource.
///
/// Deserialization validates the period, so a zero or oversized period in
/// a config file or a host message never parses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRepresentation")]
pub struct Representation {
    /// Element type of every sample.
    pub data_type: DataType,

    /// Time between two consecutive ticks. Must be non-zero.
    #[serde(with = "duration_serde")]
    pub sampling_period: Duration,
}

impl Representation {
    /// Creates a new representation.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::ZeroSamplingPeriod`] for a zero period and
    /// [`CatalogError::SamplingPeriodTooLarge`] when the period does not
    /// fit into `u64` nanoseconds.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use strata::representation::{DataType, Representation};
    ///
    /// let repr = Representation::new(DataType::Float64, Duration::from_secs(1)).unwrap();
    /// assert_eq!(repr.id(), "1_s");
    /// assert!(Representation::new(DataType::Float64, Duration::ZERO).is_err());
    /// ```
    pub fn new(data_type: DataType, sampling_period: Duration) -> Result<Self> {
        let repr = Self {
            data_type,
            sampling_period,
        };
        repr.validate("")?;
        Ok(repr)
    }

    /// Validates the sampling period. `resource` names the owner in errors.
    ///
    /// # Errors
    ///
    /// See [`Representation::new`].
    pub fn validate(&self, resource: &str) -> Result<()> {
        if self.sampling_period.is_zero() {
            return Err(CatalogError::ZeroSamplingPeriod {
                resource: resource.to_string(),
            }
            .into());
        }
        self.period_nanos()?;
        Ok(())
    }

    /// Returns the sampling period in nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::SamplingPeriodTooLarge`] if the period
    /// exceeds `u64::MAX` nanoseconds.
    pub fn period_nanos(&self) -> Result<u64> {
        u64::try_from(self.sampling_period.as_nanos()).map_err(|_| {
            CatalogError::SamplingPeriodTooLarge {
                period: self.sampling_period,
            }
            .into()
        })
    }

    /// Returns the representation identifier derived from the period.
    ///
    /// The period is expressed in the largest of `min`, `s`, `ms`, `us`,
    /// `ns` that divides it exactly, e.g. `1_s`, `100_ms`, `15_min`.
    pub fn id(&self) -> String {
        let nanos = self.sampling_period.as_nanos();
        for (unit_nanos, unit) in ID_UNITS {
            let unit_nanos = u128::from(unit_nanos);
            if nanos % unit_nanos == 0 {
                return format!("{}_{unit}", nanos / unit_nanos);
            }
        }
        format!("{nanos}_ns")
    }
}

/// Unvalidated wire shape of a [`Representation`].
#[derive(Deserialize)]
struct RawRepresentation {
    data_type: DataType,
    #[serde(with = "duration_serde")]
    sampling_period: Duration,
}

impl TryFrom<RawRepresentation> for Representation {
    type Error = StrataError;

    fn try_from(raw: RawRepresentation) -> Result<Self> {
        Self::new(raw.data_type, raw.sampling_period)
    }
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files and wire messages.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_codes_and_sizes() {
        for data_type in DataType::ALL {
            assert_eq!(DataType::from_code(data_type.code()), Some(data_type));
        }
        assert_eq!(DataType::from_code(0x999), None);

        assert_eq!(DataType::Uint8.size(), 1);
        assert_eq!(DataType::Int16.size(), 2);
        assert_eq!(DataType::Uint32.size(), 4);
        assert_eq!(DataType::Float32.size(), 4);
        assert_eq!(DataType::Uint64.size(), 8);
        assert_eq!(DataType::Float64.size(), 8);

        assert!(DataType::Float32.is_float());
        assert!(!DataType::Int64.is_float());
    }

    #[test]
    fn test_encode_saturates_integers() {
        let mut byte = [0u8; 1];
        DataType::Uint8.encode_into(300.0, &mut byte);
        assert_eq!(byte[0], u8::MAX);
        DataType::Uint8.encode_into(-5.0, &mut byte);
        assert_eq!(byte[0], 0);
        DataType::Int8.encode_into(f64::NAN, &mut byte);
        assert_eq!(byte[0], 0);

        let mut wide = [0u8; 8];
        DataType::Float64.encode_into(2.5, &mut wide);
        assert_eq!(f64::from_le_bytes(wide), 2.5);
        DataType::Int64.encode_into(-7.0, &mut wide);
        assert_eq!(i64::from_le_bytes(wide), -7);
    }

    #[test]
    fn test_data_type_serde_names() {
        let json = serde_json::to_string(&DataType::Float64).unwrap();
        assert_eq!(json, "\"FLOAT64\"");
        let parsed: DataType = serde_json::from_str("\"UINT16\"").unwrap();
        assert_eq!(parsed, DataType::Uint16);
        assert_eq!(DataType::Int32.to_string(), "INT32");
    }

    #[test]
    fn test_representation_ids() {
        let cases = [
            (Duration::from_secs(1), "1_s"),
            (Duration::from_millis(100), "100_ms"),
            (Duration::from_secs(600), "10_min"),
            (Duration::from_secs(90), "90_s"),
            (Duration::from_micros(250), "250_us"),
            (Duration::from_nanos(7), "7_ns"),
        ];
        for (period, expected) in cases {
            let repr = Representation::new(DataType::Float64, period).unwrap();
            assert_eq!(repr.id(), expected);
        }
    }

    #[test]
    fn test_representation_validation() {
        assert!(Representation::new(DataType::Int64, Duration::from_nanos(1)).is_ok());
        assert!(Representation::new(DataType::Int64, Duration::ZERO).is_err());
        assert!(Representation::new(DataType::Int64, Duration::MAX).is_err());
    }

    #[test]
    fn test_representation_serde() {
        let repr = Representation::new(DataType::Float32, Duration::from_millis(500)).unwrap();
        let json = serde_json::to_value(&repr).unwrap();
        assert_eq!(json["data_type"], "FLOAT32");
        assert_eq!(json["sampling_period"], 0.5);

        let back: Representation = serde_json::from_value(json).unwrap();
        assert_eq!(back, repr);
    }

    #[test]
    fn test_zero_period_does_not_parse() {
        let json = serde_json::json!({ "data_type": "FLOAT64", "sampling_period": 0.0 });
        let err = serde_json::from_value::<Representation>(json).unwrap_err();
        assert!(err.to_string().contains("zero sampling period"), "{err}");
    }
}
