use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use serde::de::{Error, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;

/// Decimal places kept for derived rates and fractions.
pub(crate) const PRECISION: i32 = 5;

/// Round `value` to `places` decimal places.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}

/// Round to the precision used for all derived measurement values.
pub(crate) fn round5(value: f64) -> f64 {
    round_to(value, PRECISION)
}

/// Serde helper that reads and writes a [`Duration`] as float seconds.
pub(crate) mod serde_secs {
    use super::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Visitor reading a struct of two same-typed fields.
///
/// Errors in either field are reported with the field name, so a malformed
/// input says which half of the pair is wrong.
pub(crate) struct NamedPair<T> {
    first: &'static str,
    second: &'static str,
    _ph: PhantomData<T>,
}

impl<T> NamedPair<T> {
    pub fn new(first: &'static str, second: &'static str) -> Self {
        NamedPair {
            first,
            second,
            _ph: PhantomData,
        }
    }
}

impl<'de, T: Deserialize<'de>> Visitor<'de> for NamedPair<T> {
    type Value = (T, T);

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a map with `{}` and `{}`", self.first, self.second)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut first = None;
        let mut second = None;

        while let Some(key) = map.next_key::<String>()? {
            let slot = if key == self.first {
                &mut first
            } else if key == self.second {
                &mut second
            } else {
                map.next_value::<IgnoredAny>()?;
                continue;
            };

            if slot.is_some() {
                return Err(A::Error::custom(format_args!("duplicate field `{key}`")));
            }

            let value = map
                .next_value::<T>()
                .map_err(|e| A::Error::custom(format_args!("field `{key}`: {e}")))?;
            *slot = Some(value);
        }

        let first = first.ok_or_else(|| A::Error::missing_field(self.first))?;
        let second = second.ok_or_else(|| A::Error::missing_field(self.second))?;

        Ok((first, second))
    }
}
