use tracing::{debug, trace};

use crate::engine::{AnchorOf, Trackable, TrackingFrame};
use crate::error::EngineError;
use crate::geometry::{Coordinates2d, PixelCoordinate, ViewCoordinate};
use crate::labels::LabeledAnchor;
use crate::pose::Landmark;

/// 画像ピクセル座標からワールドアンカーを作る
///
/// 変換用バッファは呼び出しごとに再利用するだけで、呼び出し間に意味を持たない。
pub struct AnchorPlacer {
    input: [f32; 2],
    output: [f32; 2],
}

impl AnchorPlacer {
    pub fn new() -> Self {
        Self {
            input: [0.0; 2],
            output: [0.0; 2],
        }
    }

    /// 画像ピクセル座標をビュー座標に変換する
    pub fn to_view<F: TrackingFrame>(
        &mut self,
        pixel: PixelCoordinate,
        frame: &F,
    ) -> Result<ViewCoordinate, EngineError> {
        self.input = [pixel.x, pixel.y];
        frame.transform_coordinates_2d(
            Coordinates2d::ImagePixels,
            &self.input,
            Coordinates2d::View,
            &mut self.output,
        )?;
        Ok(ViewCoordinate::new(self.output[0], self.output[1]))
    }

    /// (x, y) が再構成済みサーフェスに当たればアンカーを作る
    ///
    /// ヒットテスト結果の先頭のみを使う。先頭がどれかはエンジンの並び順による。
    /// 当たらなければ `Ok(None)`。エンジンのエラーはそのまま返す。
    pub fn place_anchor<F: TrackingFrame>(
        &mut self,
        x: f32,
        y: f32,
        frame: &F,
    ) -> Result<Option<AnchorOf<F>>, EngineError> {
        let view = self.to_view(PixelCoordinate::new(x, y), frame)?;

        let hits = frame.hit_test(view.x, view.y)?;
        let Some(hit) = hits.first() else {
            trace!(x, y, view_x = view.x, view_y = view.y, "no surface hit");
            return Ok(None);
        };

        let anchor = hit.trackable.create_anchor(hit.hit_pose)?;
        debug!(x, y, position = ?hit.hit_pose.position, "anchor created from hit test");
        Ok(Some(anchor))
    }

    /// ランドマーク群を順にアンカー化する。当たらなかったものは除かれ、順序は保たれる
    pub fn place_landmarks<F: TrackingFrame>(
        &mut self,
        landmarks: &[Landmark],
        frame: &F,
    ) -> Result<Vec<LabeledAnchor<AnchorOf<F>>>, EngineError> {
        let mut placed = Vec::with_capacity(landmarks.len());
        for lm in landmarks {
            if let Some(anchor) = self.place_anchor(lm.position[0], lm.position[1], frame)? {
                placed.push(LabeledAnchor::new(anchor, lm.label()));
            }
        }
        Ok(placed)
    }
}

impl Default for AnchorPlacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Anchor, HitResult, TrackingState};
    use crate::error::Acquire;
    use crate::geometry::WorldPose;
    use crate::pose::LandmarkType;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    pub struct MockTrackable {
        pub id: u32,
        /// true なら create_anchor がエンジンエラーを返す
        pub fail: bool,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct MockAnchor {
        pub pose: WorldPose,
        pub trackable_id: u32,
        pub state: TrackingState,
    }

    impl Anchor for MockAnchor {
        fn pose(&self) -> WorldPose {
            self.pose
        }

        fn tracking_state(&self) -> TrackingState {
            self.state
        }
    }

    impl Trackable for MockTrackable {
        type Anchor = MockAnchor;

        fn create_anchor(&self, pose: WorldPose) -> Result<MockAnchor, EngineError> {
            if self.fail {
                return Err(EngineError::Engine(format!("anchor limit reached on trackable {}", self.id)));
            }
            Ok(MockAnchor {
                pose,
                trackable_id: self.id,
                state: TrackingState::Tracking,
            })
        }
    }

    /// 変換表とヒット表をそのまま返すフレーム
    #[derive(Default)]
    pub struct MockFrame {
        pub transforms: Vec<([f32; 2], [f32; 2])>,
        pub hits: Vec<([f32; 2], Vec<HitResult<MockTrackable>>)>,
        pub fail_hit_test: bool,
        pub hit_tests: RefCell<Vec<[f32; 2]>>,
    }

    impl MockFrame {
        pub fn map(mut self, pixel: [f32; 2], view: [f32; 2], hits: Vec<HitResult<MockTrackable>>) -> Self {
            self.transforms.push((pixel, view));
            self.hits.push((view, hits));
            self
        }
    }

    pub fn hit(position: [f32; 3], distance: f32, id: u32) -> HitResult<MockTrackable> {
        HitResult {
            hit_pose: WorldPose::from_translation(position),
            distance,
            trackable: MockTrackable { id, fail: false },
        }
    }

    pub fn failing_hit(position: [f32; 3], distance: f32, id: u32) -> HitResult<MockTrackable> {
        HitResult {
            trackable: MockTrackable { id, fail: true },
            ..hit(position, distance, id)
        }
    }

    impl TrackingFrame for MockFrame {
        type Trackable = MockTrackable;
        type Image = ();

        fn transform_coordinates_2d(
            &self,
            input_space: Coordinates2d,
            input: &[f32],
            output_space: Coordinates2d,
            output: &mut [f32],
        ) -> Result<(), EngineError> {
            assert_eq!(input_space, Coordinates2d::ImagePixels);
            assert_eq!(output_space, Coordinates2d::View);
            let (_, view) = self
                .transforms
                .iter()
                .find(|(pixel, _)| pixel[0] == input[0] && pixel[1] == input[1])
                .ok_or_else(|| EngineError::Engine("unmapped pixel".into()))?;
            output[..2].copy_from_slice(view);
            Ok(())
        }

        fn hit_test(&self, x: f32, y: f32) -> Result<Vec<HitResult<MockTrackable>>, EngineError> {
            if self.fail_hit_test {
                return Err(EngineError::FrameExpired);
            }
            self.hit_tests.borrow_mut().push([x, y]);
            Ok(self
                .hits
                .iter()
                .find(|(view, _)| view[0] == x && view[1] == y)
                .map(|(_, hits)| hits.clone())
                .unwrap_or_default())
        }

        fn camera_tracking_state(&self) -> TrackingState {
            TrackingState::Tracking
        }

        fn camera_pose(&self) -> WorldPose {
            WorldPose::identity()
        }

        fn image_size(&self) -> (u32, u32) {
            (640, 480)
        }

        fn acquire_camera_image(&self) -> Acquire<()> {
            Acquire::NotYetAvailable
        }
    }

    #[test]
    fn test_single_hit_creates_anchor_at_hit_pose() {
        let frame = MockFrame::default().map([120.0, 340.0], [0.42, 0.71], vec![hit([0.1, 0.0, -1.2], 1.2, 7)]);
        let mut placer = AnchorPlacer::new();

        let anchor = placer.place_anchor(120.0, 340.0, &frame).unwrap().unwrap();
        assert_eq!(anchor.pose, WorldPose::from_translation([0.1, 0.0, -1.2]));
        assert_eq!(anchor.trackable_id, 7);
        // ヒットテストはビュー座標で行われる
        assert_eq!(frame.hit_tests.borrow().as_slice(), &[[0.42f32, 0.71]]);
    }

    #[test]
    fn test_no_hit_returns_none() {
        let frame = MockFrame::default().map([0.0, 0.0], [0.0, 0.0], vec![]);
        let mut placer = AnchorPlacer::new();
        assert!(placer.place_anchor(0.0, 0.0, &frame).unwrap().is_none());
    }

    #[test]
    fn test_first_hit_is_chosen() {
        // 並び順はエンジンのもの。距離が遠くても先頭を使う
        let hits = vec![hit([0.0, 0.0, -3.0], 3.0, 1), hit([0.0, 0.0, -1.0], 1.0, 2)];
        let frame = MockFrame::default().map([10.0, 10.0], [0.5, 0.5], hits);
        let mut placer = AnchorPlacer::new();

        let first = placer.place_anchor(10.0, 10.0, &frame).unwrap().unwrap();
        let second = placer.place_anchor(10.0, 10.0, &frame).unwrap().unwrap();
        assert_eq!(first.trackable_id, 1);
        assert_eq!(first.pose.position, [0.0, 0.0, -3.0]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_engine_error_propagates() {
        let mut frame = MockFrame::default().map([1.0, 1.0], [0.1, 0.1], vec![hit([0.0; 3], 1.0, 1)]);
        frame.fail_hit_test = true;
        let mut placer = AnchorPlacer::new();
        assert!(matches!(placer.place_anchor(1.0, 1.0, &frame), Err(EngineError::FrameExpired)));
    }

    #[test]
    fn test_create_anchor_error_propagates() {
        let frame = MockFrame::default().map([4.0, 4.0], [0.4, 0.4], vec![failing_hit([0.0, 0.0, -2.0], 2.0, 9)]);
        let mut placer = AnchorPlacer::new();
        match placer.place_anchor(4.0, 4.0, &frame) {
            Err(EngineError::Engine(msg)) => assert!(msg.contains("trackable 9")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_place_landmarks_stops_at_failing_anchor() {
        let frame = MockFrame::default()
            .map([10.0, 10.0], [0.1, 0.1], vec![hit([1.0, 0.0, 0.0], 1.0, 1)])
            .map([20.0, 20.0], [0.2, 0.2], vec![failing_hit([2.0, 0.0, 0.0], 1.0, 2)])
            .map([30.0, 30.0], [0.3, 0.3], vec![hit([3.0, 0.0, 0.0], 1.0, 3)]);
        let landmarks = [
            Landmark::new(LandmarkType::LeftShoulder, 10.0, 10.0, 0.9),
            Landmark::new(LandmarkType::RightShoulder, 20.0, 20.0, 0.9),
            Landmark::new(LandmarkType::LeftHip, 30.0, 30.0, 0.9),
        ];
        let mut placer = AnchorPlacer::new();

        assert!(matches!(placer.place_landmarks(&landmarks, &frame), Err(EngineError::Engine(_))));
        // 失敗したランドマーク以降はヒットテストしない
        assert_eq!(frame.hit_tests.borrow().as_slice(), &[[0.1f32, 0.1], [0.2, 0.2]]);
    }

    #[test]
    fn test_transform_error_propagates() {
        let frame = MockFrame::default();
        let mut placer = AnchorPlacer::new();
        assert!(matches!(placer.place_anchor(5.0, 5.0, &frame), Err(EngineError::Engine(_))));
    }

    #[test]
    fn test_place_landmarks_skips_misses_and_keeps_order() {
        let frame = MockFrame::default()
            .map([10.0, 10.0], [0.1, 0.1], vec![hit([1.0, 0.0, 0.0], 1.0, 1)])
            .map([20.0, 20.0], [0.2, 0.2], vec![])
            .map([30.0, 30.0], [0.3, 0.3], vec![hit([3.0, 0.0, 0.0], 1.0, 3)]);
        let landmarks = [
            Landmark::new(LandmarkType::LeftShoulder, 10.0, 10.0, 0.9),
            Landmark::new(LandmarkType::RightShoulder, 20.0, 20.0, 0.9),
            Landmark::new(LandmarkType::LeftHip, 30.0, 30.0, 0.9),
        ];
        let mut placer = AnchorPlacer::new();

        let placed = placer.place_landmarks(&landmarks, &frame).unwrap();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].label, "LEFT_SHOULDER");
        assert_eq!(placed[0].anchor.trackable_id, 1);
        assert_eq!(placed[1].label, "LEFT_HIP");
        assert_eq!(placed[1].anchor.trackable_id, 3);
    }
}
