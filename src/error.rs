//! Errors raised by the tracking engine, and the three-way result used for
//! resources that may simply not be ready yet.

/// トラッキングエンジン由来のエラー
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// カメラが使用できず、現在フレームを取得できない
    #[error("Camera not available")]
    CameraNotAvailable,

    /// フレームが既に更新されており、無効になっている
    #[error("Frame is no longer valid")]
    FrameExpired,

    #[error("Coordinate buffer too short: need {needed}, got {actual}")]
    BufferTooShort { needed: usize, actual: usize },

    #[error("Tracking engine failure: {0}")]
    Engine(String),
}

impl EngineError {
    /// フレーム自体が得られなかったエラーか（呼び出し側はフレームをスキップする）
    pub fn is_frame_unavailable(&self) -> bool {
        matches!(self, EngineError::CameraNotAvailable)
    }
}

/// まだ用意できていない可能性のあるリソースの取得結果
///
/// 「まだ無い」と「壊れた」を区別する。
#[derive(Debug)]
pub enum Acquire<T> {
    Ready(T),
    NotYetAvailable,
    Failed(EngineError),
}

impl<T> Acquire<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Acquire::Ready(_))
    }

    /// NotYetAvailable を None に畳み、失敗だけをエラーとして返す
    pub fn into_result(self) -> Result<Option<T>, EngineError> {
        match self {
            Acquire::Ready(value) => Ok(Some(value)),
            Acquire::NotYetAvailable => Ok(None),
            Acquire::Failed(e) => Err(e),
        }
    }
}
