//! 输出 PCM 编码定义.
//!
//! 对标 mpg123 的 `mpg123_enc_enum`, 所有编码均为按声道交错排列, 本机字节序.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::TaoError;

/// 输出采样编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// 有符号 16 位整数
    S16,
    /// 有符号 32 位整数
    S32,
    /// 无符号 8 位整数
    U8,
    /// 有符号 8 位整数
    S8,
    /// 8 位 µ-law (G.711)
    Ulaw8,
    /// 8 位 A-law (G.711)
    Alaw8,
    /// 32 位浮点, 满幅 ±1.0
    F32,
}

impl Encoding {
    /// 协商时的默认优先顺序
    pub const PREFERENCE: [Encoding; 7] = [
        Self::S16,
        Self::S32,
        Self::F32,
        Self::S8,
        Self::U8,
        Self::Ulaw8,
        Self::Alaw8,
    ];

    /// 每个采样点占用的字节数
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 | Self::S8 | Self::Ulaw8 | Self::Alaw8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
        }
    }

    /// 是否为经 16 位中间值查表得到的 8 位编码
    pub const fn is_8bit(&self) -> bool {
        self.bytes_per_sample() == 1
    }

    /// 对应的能力位
    pub const fn flag(&self) -> Encodings {
        match self {
            Self::S16 => Encodings::S16,
            Self::S32 => Encodings::S32,
            Self::U8 => Encodings::U8,
            Self::S8 => Encodings::S8,
            Self::Ulaw8 => Encodings::ULAW8,
            Self::Alaw8 => Encodings::ALAW8,
            Self::F32 => Encodings::F32,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::Ulaw8 => "ulaw",
            Self::Alaw8 => "alaw",
            Self::F32 => "f32",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Encoding {
    type Err = TaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s16" => Ok(Self::S16),
            "s32" => Ok(Self::S32),
            "u8" => Ok(Self::U8),
            "s8" => Ok(Self::S8),
            "ulaw" | "mulaw" => Ok(Self::Ulaw8),
            "alaw" => Ok(Self::Alaw8),
            "f32" | "float" => Ok(Self::F32),
            other => Err(TaoError::BadParameter(format!("未知输出编码: {other}"))),
        }
    }
}

bitflags! {
    /// 编码集合, 用于输出格式偏好
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Encodings: u8 {
        const S16 = 1 << 0;
        const S32 = 1 << 1;
        const U8 = 1 << 2;
        const S8 = 1 << 3;
        const ULAW8 = 1 << 4;
        const ALAW8 = 1 << 5;
        const F32 = 1 << 6;
        const EIGHT_BIT = Self::U8.bits() | Self::S8.bits() | Self::ULAW8.bits() | Self::ALAW8.bits();
    }
}

impl Encodings {
    /// 集合中是否包含指定编码
    pub fn allows(&self, enc: Encoding) -> bool {
        self.contains(enc.flag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_编码字节宽度() {
        assert_eq!(Encoding::S16.bytes_per_sample(), 2);
        assert_eq!(Encoding::S32.bytes_per_sample(), 4);
        assert_eq!(Encoding::F32.bytes_per_sample(), 4);
        assert!(Encoding::Ulaw8.is_8bit());
        assert!(!Encoding::S16.is_8bit());
    }

    #[test]
    fn test_编码解析() {
        assert_eq!("ulaw".parse::<Encoding>().unwrap(), Encoding::Ulaw8);
        assert_eq!("F32".parse::<Encoding>().unwrap(), Encoding::F32);
        assert!("s24".parse::<Encoding>().is_err());
        assert_eq!(Encoding::Alaw8.to_string(), "alaw");
    }

    #[test]
    fn test_编码集合() {
        let set = Encodings::EIGHT_BIT;
        assert!(set.allows(Encoding::U8));
        assert!(set.allows(Encoding::Alaw8));
        assert!(!set.allows(Encoding::S16));
    }
}
