//! In-process stand-in for the AR tracking engine.
//!
//! A pinhole camera looks at a fixed set of reconstructed planes. Hit tests
//! are ray/plane intersections sorted nearest first. Anchors share their
//! tracking state with the session so it can be degraded from outside.

use anyhow::Result;
use nalgebra::{Point3, Unit, UnitQuaternion, Vector3};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::SimulationConfig;
use crate::engine::{Anchor, HitResult, Trackable, TrackingFrame, TrackingSession, TrackingState};
use crate::error::{Acquire, EngineError};
use crate::geometry::{Coordinates2d, WorldPose};
use crate::pose::rotation::{normalize_rotation, sensor_to_upright};
use crate::pose::{Landmark, LandmarkType, PoseAnalyzer};

fn encode_state(state: TrackingState) -> u8 {
    match state {
        TrackingState::Tracking => 0,
        TrackingState::Paused => 1,
        TrackingState::Stopped => 2,
    }
}

fn decode_state(value: u8) -> TrackingState {
    match value {
        0 => TrackingState::Tracking,
        1 => TrackingState::Paused,
        _ => TrackingState::Stopped,
    }
}

/// 再構成済みの平面
#[derive(Debug, Clone)]
pub struct SimPlane {
    pub id: u32,
    pub center: Point3<f32>,
    pub normal: Unit<Vector3<f32>>,
    /// 中心からの有効半径。None なら無限平面
    pub radius: Option<f32>,
    orientation: UnitQuaternion<f32>,
}

impl SimPlane {
    pub fn new(id: u32, center: Point3<f32>, normal: Vector3<f32>, radius: Option<f32>) -> Self {
        let normal = Unit::new_normalize(normal);
        // 平面の +Y を法線に合わせる
        let orientation = UnitQuaternion::rotation_between(&Vector3::y(), &normal.into_inner())
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f32::consts::PI));
        Self {
            id,
            center,
            normal,
            radius,
            orientation,
        }
    }

    /// 高さ y の無限の床
    pub fn floor(id: u32, y: f32) -> Self {
        Self::new(id, Point3::new(0.0, y, 0.0), Vector3::y(), None)
    }

    /// z = `z` の壁（+Z 向き）
    pub fn wall(id: u32, z: f32, center_height: f32, radius: f32) -> Self {
        Self::new(id, Point3::new(0.0, center_height, z), Vector3::z(), Some(radius))
    }

    /// レイとの交点 (距離, 交点)
    fn intersect(&self, origin: &Point3<f32>, dir: &Unit<Vector3<f32>>) -> Option<(f32, Point3<f32>)> {
        let denom = self.normal.dot(&dir.into_inner());
        if denom.abs() < 1e-6 {
            return None;
        }
        let t = self.normal.dot(&(self.center - origin)) / denom;
        if t <= 0.0 {
            return None;
        }
        let point = origin + dir.into_inner() * t;
        if let Some(radius) = self.radius {
            if (point - self.center).norm() > radius {
                return None;
            }
        }
        Some((t, point))
    }
}

#[derive(Default)]
struct AnchorRegistry {
    next_id: AtomicU64,
    states: Mutex<Vec<Arc<AtomicU8>>>,
}

impl AnchorRegistry {
    fn register(&self) -> (u64, Arc<AtomicU8>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(AtomicU8::new(encode_state(TrackingState::Tracking)));
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.push(Arc::clone(&state));
        (id, state)
    }

    fn set_all(&self, state: TrackingState) {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        for s in states.iter() {
            s.store(encode_state(state), Ordering::Release);
        }
    }

    /// 呼び出し側がまだ保持しているアンカー数
    fn live_count(&self) -> usize {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.retain(|s| Arc::strong_count(s) > 1);
        states.len()
    }
}

#[derive(Debug)]
pub struct SimAnchor {
    pub id: u64,
    pub plane_id: u32,
    pose: WorldPose,
    state: Arc<AtomicU8>,
}

impl Anchor for SimAnchor {
    fn pose(&self) -> WorldPose {
        self.pose
    }

    fn tracking_state(&self) -> TrackingState {
        decode_state(self.state.load(Ordering::Acquire))
    }
}

#[derive(Clone)]
pub struct SimTrackable {
    pub plane_id: u32,
    registry: Arc<AnchorRegistry>,
}

impl std::fmt::Debug for SimTrackable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimTrackable").field("plane_id", &self.plane_id).finish()
    }
}

impl Trackable for SimTrackable {
    type Anchor = SimAnchor;

    fn create_anchor(&self, pose: WorldPose) -> Result<SimAnchor, EngineError> {
        let (id, state) = self.registry.register();
        Ok(SimAnchor {
            id,
            plane_id: self.plane_id,
            pose,
            state,
        })
    }
}

/// シミュレーションのカメラ画像
#[derive(Debug, Clone, PartialEq)]
pub struct SimImage {
    pub frame_index: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
struct Viewport {
    image_width: f32,
    image_height: f32,
    view_width: f32,
    view_height: f32,
    display_rotation: i32,
}

impl Viewport {
    /// 正規化座標を時計回りに回転
    fn rotate(u: f32, v: f32, rotation: i32) -> (f32, f32) {
        match rotation {
            90 => (1.0 - v, u),
            180 => (1.0 - u, 1.0 - v),
            270 => (v, 1.0 - u),
            _ => (u, v),
        }
    }

    fn to_normalized_image(&self, space: Coordinates2d, x: f32, y: f32) -> (f32, f32) {
        match space {
            Coordinates2d::ImagePixels => (x / self.image_width, y / self.image_height),
            Coordinates2d::ImageNormalized => (x, y),
            Coordinates2d::View => {
                Self::rotate(x / self.view_width, y / self.view_height, 360 - self.display_rotation)
            }
            Coordinates2d::ViewNormalized => Self::rotate(x, y, 360 - self.display_rotation),
        }
    }

    fn from_normalized_image(&self, space: Coordinates2d, u: f32, v: f32) -> (f32, f32) {
        match space {
            Coordinates2d::ImagePixels => (u * self.image_width, v * self.image_height),
            Coordinates2d::ImageNormalized => (u, v),
            Coordinates2d::View => {
                let (vu, vv) = Self::rotate(u, v, self.display_rotation);
                (vu * self.view_width, vv * self.view_height)
            }
            Coordinates2d::ViewNormalized => Self::rotate(u, v, self.display_rotation),
        }
    }
}

pub struct SimFrame {
    index: u64,
    viewport: Viewport,
    camera_position: Point3<f32>,
    camera_rotation: UnitQuaternion<f32>,
    tan_half_fov: f32,
    camera_state: TrackingState,
    image_ready: bool,
    image_failing: bool,
    planes: Arc<Vec<SimPlane>>,
    registry: Arc<AnchorRegistry>,
}

impl SimFrame {
    pub fn index(&self) -> u64 {
        self.index
    }

    fn view_ray(&self, x: f32, y: f32) -> Unit<Vector3<f32>> {
        let ndc_x = 2.0 * x / self.viewport.view_width - 1.0;
        let ndc_y = 1.0 - 2.0 * y / self.viewport.view_height;
        let aspect = self.viewport.view_width / self.viewport.view_height;
        let dir_cam = Vector3::new(ndc_x * self.tan_half_fov * aspect, ndc_y * self.tan_half_fov, -1.0);
        Unit::new_normalize(self.camera_rotation * dir_cam)
    }
}

impl TrackingFrame for SimFrame {
    type Trackable = SimTrackable;
    type Image = SimImage;

    fn transform_coordinates_2d(
        &self,
        input_space: Coordinates2d,
        input: &[f32],
        output_space: Coordinates2d,
        output: &mut [f32],
    ) -> Result<(), EngineError> {
        if input.len() % 2 != 0 {
            return Err(EngineError::Engine(format!("odd coordinate count: {}", input.len())));
        }
        if output.len() < input.len() {
            return Err(EngineError::BufferTooShort {
                needed: input.len(),
                actual: output.len(),
            });
        }
        for (src, dst) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let (u, v) = self.viewport.to_normalized_image(input_space, src[0], src[1]);
            let (x, y) = self.viewport.from_normalized_image(output_space, u, v);
            dst[0] = x;
            dst[1] = y;
        }
        Ok(())
    }

    fn hit_test(&self, x: f32, y: f32) -> Result<Vec<HitResult<SimTrackable>>, EngineError> {
        let dir = self.view_ray(x, y);
        let mut hits: Vec<HitResult<SimTrackable>> = self
            .planes
            .iter()
            .filter_map(|plane| {
                plane.intersect(&self.camera_position, &dir).map(|(distance, point)| HitResult {
                    hit_pose: WorldPose::from_isometry(point, plane.orientation),
                    distance,
                    trackable: SimTrackable {
                        plane_id: plane.id,
                        registry: Arc::clone(&self.registry),
                    },
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }

    fn camera_tracking_state(&self) -> TrackingState {
        self.camera_state
    }

    fn camera_pose(&self) -> WorldPose {
        WorldPose::from_isometry(self.camera_position, self.camera_rotation)
    }

    fn image_size(&self) -> (u32, u32) {
        (self.viewport.image_width as u32, self.viewport.image_height as u32)
    }

    fn acquire_camera_image(&self) -> Acquire<SimImage> {
        if self.image_failing {
            return Acquire::Failed(EngineError::Engine("camera image acquisition failed".into()));
        }
        if !self.image_ready {
            return Acquire::NotYetAvailable;
        }
        let (width, height) = self.image_size();
        Acquire::Ready(SimImage {
            frame_index: self.index,
            width,
            height,
        })
    }
}

/// シミュレーションのトラッキングセッション
pub struct SimulatedSession {
    viewport: Viewport,
    camera_position: Point3<f32>,
    camera_rotation: UnitQuaternion<f32>,
    tan_half_fov: f32,
    image_ready_after: u32,
    planes: Arc<Vec<SimPlane>>,
    registry: Arc<AnchorRegistry>,
    frame_index: u64,
    camera_available: bool,
    image_failing: bool,
    camera_state: TrackingState,
}

impl SimulatedSession {
    /// 床と正面の壁を持つセッション
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        let planes = vec![
            SimPlane::floor(1, 0.0),
            SimPlane::wall(2, -4.0, config.camera_height, 3.0),
        ];
        Self::with_planes(config, planes)
    }

    pub fn with_planes(config: &SimulationConfig, planes: Vec<SimPlane>) -> Result<Self> {
        let display_rotation = normalize_rotation(config.display_rotation)?;
        if config.image_width == 0 || config.image_height == 0 || config.view_width == 0 || config.view_height == 0 {
            anyhow::bail!("Simulation image and view sizes must be non-zero");
        }
        Ok(Self {
            viewport: Viewport {
                image_width: config.image_width as f32,
                image_height: config.image_height as f32,
                view_width: config.view_width as f32,
                view_height: config.view_height as f32,
                display_rotation,
            },
            camera_position: Point3::new(0.0, config.camera_height, 0.0),
            camera_rotation: UnitQuaternion::from_axis_angle(
                &Vector3::x_axis(),
                config.camera_pitch_deg.to_radians(),
            ),
            tan_half_fov: (config.fov_v_deg.to_radians() / 2.0).tan(),
            image_ready_after: config.image_ready_after,
            planes: Arc::new(planes),
            registry: Arc::new(AnchorRegistry::default()),
            frame_index: 0,
            camera_available: true,
            image_failing: false,
            camera_state: TrackingState::Tracking,
        })
    }

    /// false にすると update() が CameraNotAvailable を返す
    pub fn set_camera_available(&mut self, available: bool) {
        self.camera_available = available;
    }

    /// true にするとカメラ画像の取得が Failed を返す
    pub fn set_image_acquire_failing(&mut self, failing: bool) {
        self.image_failing = failing;
    }

    pub fn set_camera_tracking(&mut self, state: TrackingState) {
        self.camera_state = state;
    }

    /// 作成済みの全アンカーのトラッキング状態を変える
    pub fn set_anchor_tracking(&self, state: TrackingState) {
        self.registry.set_all(state);
    }

    /// まだ破棄されていないアンカー数
    pub fn live_anchor_count(&self) -> usize {
        self.registry.live_count()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

impl TrackingSession for SimulatedSession {
    type Frame = SimFrame;

    fn update(&mut self) -> Result<SimFrame, EngineError> {
        if !self.camera_available {
            return Err(EngineError::CameraNotAvailable);
        }
        self.frame_index += 1;
        Ok(SimFrame {
            index: self.frame_index,
            viewport: self.viewport,
            camera_position: self.camera_position,
            camera_rotation: self.camera_rotation,
            tan_half_fov: self.tan_half_fov,
            camera_state: self.camera_state,
            image_ready: self.frame_index > self.image_ready_after as u64,
            image_failing: self.image_failing,
            planes: Arc::clone(&self.planes),
            registry: Arc::clone(&self.registry),
        })
    }

    fn camera_sensor_to_display_rotation(&self) -> i32 {
        self.viewport.display_rotation
    }
}

/// 決まったランドマークを返す推論器
///
/// ランドマークはセンサー画像のピクセル座標で持ち、回転指定があれば正立画像の座標で返す。
pub struct ScriptedAnalyzer {
    landmarks: Vec<Landmark>,
    latency: Duration,
}

impl ScriptedAnalyzer {
    pub fn new(landmarks: Vec<Landmark>, latency: Duration) -> Self {
        Self { landmarks, latency }
    }

    /// 画像中央付近に立つ人物
    pub fn standing_person(width: u32, height: u32, latency: Duration) -> Self {
        let w = width as f32;
        let h = height as f32;
        // (種別, x比, y比, 尤度, 腰中心からの相対深度)
        let layout = [
            (LandmarkType::Nose, 0.50, 0.55, 0.99, -0.10),
            (LandmarkType::LeftEar, 0.47, 0.56, 0.20, 0.05),
            (LandmarkType::LeftShoulder, 0.44, 0.62, 0.97, 0.02),
            (LandmarkType::RightShoulder, 0.56, 0.62, 0.97, 0.02),
            (LandmarkType::LeftElbow, 0.42, 0.70, 0.90, 0.04),
            (LandmarkType::RightElbow, 0.58, 0.70, 0.90, 0.04),
            (LandmarkType::LeftHip, 0.46, 0.78, 0.95, 0.0),
            (LandmarkType::RightHip, 0.54, 0.78, 0.95, 0.0),
            (LandmarkType::LeftKnee, 0.46, 0.88, 0.92, -0.03),
            (LandmarkType::RightKnee, 0.54, 0.88, 0.92, -0.03),
            (LandmarkType::LeftAnkle, 0.46, 0.97, 0.85, 0.01),
            (LandmarkType::RightAnkle, 0.54, 0.97, 0.85, 0.01),
        ];
        let landmarks = layout
            .iter()
            .map(|&(kind, x, y, likelihood, depth)| Landmark::new(kind, x * w, y * h, likelihood).with_depth(depth))
            .collect();
        Self::new(landmarks, latency)
    }
}

impl PoseAnalyzer<SimImage> for ScriptedAnalyzer {
    fn analyze(&mut self, image: &SimImage, rotation_degrees: i32) -> Result<Vec<Landmark>> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        self.landmarks
            .iter()
            .map(|lm| {
                let (x, y) =
                    sensor_to_upright(lm.position[0], lm.position[1], image.width, image.height, rotation_degrees)?;
                let mut rotated = *lm;
                rotated.position = [x, y];
                rotated.position_3d[0] = x;
                rotated.position_3d[1] = y;
                Ok(rotated)
            })
            .collect()
    }
}
