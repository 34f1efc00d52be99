//! # tao-core
//!
//! Tao MPEG 音频解码引擎核心库, 提供错误类型与输出编码定义.
//!
//! 本 crate 对标 mpg123 的公共头文件 (`mpg123.h` 中的错误码与编码枚举).

pub mod encoding;
pub mod error;

// 重导出常用类型
pub use encoding::{Encoding, Encodings};
pub use error::{TaoError, TaoResult};
