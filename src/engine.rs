//! Seams to the external AR tracking engine.
//!
//! The engine owns sessions, frames, trackable surfaces and anchors. This
//! crate only consumes the capabilities below.

use crate::error::{Acquire, EngineError};
use crate::geometry::{Coordinates2d, WorldPose};

/// トラッキング状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingState {
    Tracking,
    Paused,
    Stopped,
}

impl TrackingState {
    pub fn is_tracking(self) -> bool {
        self == TrackingState::Tracking
    }
}

/// 環境に固定された3D姿勢
pub trait Anchor {
    fn pose(&self) -> WorldPose;
    fn tracking_state(&self) -> TrackingState;
}

/// アンカーを取り付けられる再構成済みサーフェス（点・平面・メッシュ）
pub trait Trackable {
    type Anchor: Anchor;

    fn create_anchor(&self, pose: WorldPose) -> Result<Self::Anchor, EngineError>;
}

/// ヒットテストの1件
#[derive(Debug, Clone)]
pub struct HitResult<T> {
    pub hit_pose: WorldPose,
    /// カメラからの距離（メートル）
    pub distance: f32,
    pub trackable: T,
}

/// フレームごとのスナップショット
pub trait TrackingFrame {
    type Trackable: Trackable;
    type Image: Send + 'static;

    /// `input` の点列を `input_space` から `output_space` へ変換する。
    /// 2要素で1点。端末の向きとカメラ→表示の回転はエンジン側が考慮する。
    fn transform_coordinates_2d(
        &self,
        input_space: Coordinates2d,
        input: &[f32],
        output_space: Coordinates2d,
        output: &mut [f32],
    ) -> Result<(), EngineError>;

    /// ビュー座標 (x, y) でのヒットテスト。
    ///
    /// 並び順はエンジンの契約であり、近い順とは限らない。
    fn hit_test(&self, x: f32, y: f32) -> Result<Vec<HitResult<Self::Trackable>>, EngineError>;

    fn camera_tracking_state(&self) -> TrackingState;

    fn camera_pose(&self) -> WorldPose;

    /// カメラ画像の解像度 (width, height)
    fn image_size(&self) -> (u32, u32);

    /// このフレームのカメラ画像。まだ用意できていなければ NotYetAvailable
    fn acquire_camera_image(&self) -> Acquire<Self::Image>;
}

/// フレームから作られるアンカーの型
pub type AnchorOf<F> = <<F as TrackingFrame>::Trackable as Trackable>::Anchor;

/// ライブなトラッキングセッション
pub trait TrackingSession {
    type Frame: TrackingFrame;

    /// 次のフレームを取得する。カメラが使えなければ `EngineError::CameraNotAvailable`
    fn update(&mut self) -> Result<Self::Frame, EngineError>;

    /// カメラセンサー→表示の回転（度、90の倍数）
    fn camera_sensor_to_display_rotation(&self) -> i32;
}
