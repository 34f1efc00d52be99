//! 统一错误类型定义.
//!
//! 解码引擎各模块共用的错误类型. 其中 `NeedMoreData`, `Eof`, `NewFormat`
//! 属于流程信号而非真正的错误, 调用方据此决定补充数据、结束或重新确认输出格式.

use thiserror::Error;

/// Tao 解码引擎统一错误类型
#[derive(Debug, Error)]
pub enum TaoError {
    /// 调用方提供了无效配置 (如该声道数下不支持的编码)
    #[error("无效参数: {0}")]
    BadParameter(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 码流错误: 重同步预算耗尽或数据损坏到无法修复, 当前打开的流不可继续
    #[error("码流错误: {0}")]
    Stream(String),

    /// 解码内核错误
    #[error("解码内核错误: {0}")]
    Kernel(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 输出格式已变化, 调用方确认后继续解码
    #[error("输出格式已变化")]
    NewFormat,

    /// 内存分配失败, 句柄保持在上一个有效状态
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 定位目标超出已知流长度
    #[error("定位目标 {target} 超出范围 (上限 {limit})")]
    SeekOutOfRange { target: u64, limit: u64 },

    /// 操作被外部取消
    #[error("操作已取消")]
    Cancelled,

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl TaoError {
    /// 是否为流程信号 (需要更多数据 / 流结束 / 新格式), 而非错误
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::NeedMoreData | Self::Eof | Self::NewFormat)
    }

    /// 是否为致命错误: 当前打开的流必须关闭后重新打开或重新定位
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Stream(_) | Self::Io(_) | Self::Internal(_))
    }
}

/// Tao 解码引擎统一 Result 类型
pub type TaoResult<T> = Result<T, TaoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_错误分类() {
        assert!(TaoError::NeedMoreData.is_signal());
        assert!(TaoError::NewFormat.is_signal());
        assert!(!TaoError::NewFormat.is_fatal());
        assert!(TaoError::Stream("重同步失败".into()).is_fatal());
        assert!(!TaoError::SeekOutOfRange { target: 10, limit: 5 }.is_fatal());
    }

    #[test]
    fn test_io_错误转换() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        let err: TaoError = io.into();
        assert!(matches!(err, TaoError::Io(_)));
        assert!(err.is_fatal());
    }
}
