// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Human-readable configuration value types used by the TOML config surface.

use std::fmt;
use std::ops::{Div, Mul};
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const KIB: u64 = 1024;
pub const MIB: u64 = KIB * 1024;
pub const GIB: u64 = MIB * 1024;

/// A byte size configurable as `"128KiB"`, `"64MiB"`, `"1GiB"` or a bare
/// number of bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadableSize(pub u64);

impl ReadableSize {
    pub const fn kib(n: u64) -> ReadableSize {
        ReadableSize(n * KIB)
    }

    pub const fn mib(n: u64) -> ReadableSize {
        ReadableSize(n * MIB)
    }

    pub const fn gib(n: u64) -> ReadableSize {
        ReadableSize(n * GIB)
    }

    pub const fn as_bytes(self) -> u64 {
        self.0
    }
}

impl Mul<u64> for ReadableSize {
    type Output = ReadableSize;

    fn mul(self, rhs: u64) -> ReadableSize {
        ReadableSize(self.0 * rhs)
    }
}

impl Div<u64> for ReadableSize {
    type Output = ReadableSize;

    fn div(self, rhs: u64) -> ReadableSize {
        ReadableSize(self.0 / rhs)
    }
}

impl fmt::Display for ReadableSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= GIB && self.0 % GIB == 0 {
            write!(f, "{}GiB", self.0 / GIB)
        } else if self.0 >= MIB && self.0 % MIB == 0 {
            write!(f, "{}MiB", self.0 / MIB)
        } else if self.0 >= KIB && self.0 % KIB == 0 {
            write!(f, "{}KiB", self.0 / KIB)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

impl FromStr for ReadableSize {
    type Err = String;

    fn from_str(s: &str) -> Result<ReadableSize, String> {
        let s = s.trim();
        let digits_end = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (num, unit) = s.split_at(digits_end);
        let num: u64 = num
            .parse()
            .map_err(|e| format!("invalid size {:?}: {}", s, e))?;
        let mult = match unit.trim() {
            "" | "B" => 1,
            "KiB" | "KB" | "K" => KIB,
            "MiB" | "MB" | "M" => MIB,
            "GiB" | "GB" | "G" => GIB,
            u => return Err(format!("invalid size unit {:?}", u)),
        };
        Ok(ReadableSize(num * mult))
    }
}

impl Serialize for ReadableSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ReadableSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<ReadableSize, D::Error> {
        struct SizeVisitor;

        impl<'de> Visitor<'de> for SizeVisitor {
            type Value = ReadableSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a size string or a number of bytes")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ReadableSize, E> {
                Ok(ReadableSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ReadableSize, E> {
                if v < 0 {
                    return Err(E::custom(format!("size cannot be negative: {}", v)));
                }
                Ok(ReadableSize(v as u64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ReadableSize, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}

/// A duration configurable as `"3600s"`, `"60s"`, `"100ms"` or `"1h"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadableDuration(pub Duration);

impl ReadableDuration {
    pub const fn millis(n: u64) -> ReadableDuration {
        ReadableDuration(Duration::from_millis(n))
    }

    pub const fn secs(n: u64) -> ReadableDuration {
        ReadableDuration(Duration::from_secs(n))
    }

    pub const fn hours(n: u64) -> ReadableDuration {
        ReadableDuration(Duration::from_secs(n * 3600))
    }

    pub fn as_millis(self) -> u64 {
        self.0.as_millis() as u64
    }

    pub const fn as_duration(self) -> Duration {
        self.0
    }
}

impl From<ReadableDuration> for Duration {
    fn from(d: ReadableDuration) -> Duration {
        d.0
    }
}

impl fmt::Display for ReadableDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis() as u64;
        if millis % 3_600_000 == 0 {
            write!(f, "{}h", millis / 3_600_000)
        } else if millis % 1000 == 0 {
            write!(f, "{}s", millis / 1000)
        } else {
            write!(f, "{}ms", millis)
        }
    }
}

impl FromStr for ReadableDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<ReadableDuration, String> {
        let s = s.trim();
        let digits_end = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (num, unit) = s.split_at(digits_end);
        let num: u64 = num
            .parse()
            .map_err(|e| format!("invalid duration {:?}: {}", s, e))?;
        let millis = match unit.trim() {
            "ms" => num,
            "" | "s" => num * 1000,
            "m" => num * 60 * 1000,
            "h" => num * 3600 * 1000,
            u => return Err(format!("invalid duration unit {:?}", u)),
        };
        Ok(ReadableDuration::millis(millis))
    }
}

impl Serialize for ReadableDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ReadableDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<ReadableDuration, D::Error> {
        struct DurVisitor;

        impl<'de> Visitor<'de> for DurVisitor {
            type Value = ReadableDuration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration string or a number of seconds")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ReadableDuration, E> {
                Ok(ReadableDuration::secs(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ReadableDuration, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_size_parse() {
        assert_eq!("131072".parse::<ReadableSize>().unwrap(), ReadableSize(131072));
        assert_eq!("128KiB".parse::<ReadableSize>().unwrap(), ReadableSize::kib(128));
        assert_eq!("64MiB".parse::<ReadableSize>().unwrap(), ReadableSize::mib(64));
        assert_eq!("1GiB".parse::<ReadableSize>().unwrap(), ReadableSize::gib(1));
        assert!("12XB".parse::<ReadableSize>().is_err());
    }

    #[test]
    fn test_readable_size_display() {
        assert_eq!(ReadableSize::gib(1).to_string(), "1GiB");
        assert_eq!(ReadableSize::mib(128).to_string(), "128MiB");
        assert_eq!(ReadableSize(100).to_string(), "100B");
    }

    #[test]
    fn test_readable_duration_parse() {
        assert_eq!("3600s".parse::<ReadableDuration>().unwrap(), ReadableDuration::hours(1));
        assert_eq!("100ms".parse::<ReadableDuration>().unwrap(), ReadableDuration::millis(100));
        assert_eq!("1h".parse::<ReadableDuration>().unwrap(), ReadableDuration::hours(1));
        assert_eq!(ReadableDuration::hours(1).to_string(), "1h");
    }
}
