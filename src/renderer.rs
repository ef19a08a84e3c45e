//! Per-frame control loop.
//!
//! Each tick updates the tracking session, hands a camera image to the
//! inference worker when a scan is requested and the worker is idle, turns a
//! completed inference into a fresh batch of labeled anchors, and draws the
//! current batch through a [`LabelSink`].

use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, InferenceConfig, ScanConfig};
use crate::engine::{Anchor, AnchorOf, TrackingFrame, TrackingSession};
use crate::geometry::WorldPose;
use crate::inference::{InferencePipeline, InferenceState};
use crate::labels::LabeledAnchorSet;
use crate::placer::AnchorPlacer;
use crate::pose::{remap_landmarks, Landmark};

/// セッションのフレームが返すカメラ画像の型
pub type ImageOf<S> = <<S as TrackingSession>::Frame as TrackingFrame>::Image;

/// ラベルの描画先
pub trait LabelSink {
    fn draw_label(&mut self, label: &str, anchor_pose: &WorldPose, camera_pose: &WorldPose);
}

/// ユーザーに見せる通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// カメラが使えない。アプリの再起動を促す
    CameraUnavailable,
    /// 推論結果にランドマークが無かった
    NoLandmarks,
    /// 一部のランドマークをサーフェスに固定できなかった。端末を動かして環境を認識させる
    NotAnchored { detected: usize, anchored: usize },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::CameraUnavailable => write!(f, "Camera not available. Try restarting the app."),
            Notice::NoLandmarks => write!(f, "Pose detection returned no landmarks."),
            Notice::NotAnchored { detected, anchored } => write!(
                f,
                "{} of {} landmarks could not be attached to an anchor. \
                 Try moving the device around to obtain a better understanding of the environment.",
                detected - anchored,
                detected
            ),
        }
    }
}

/// フレームをスキップした理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CameraUnavailable,
    NotTracking,
}

/// 1フレーム分の処理結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub skipped: Option<SkipReason>,
    /// このフレームで推論に画像を送ったか
    pub submitted: bool,
    /// 新しいバッチを公開した場合、そのバージョン
    pub published: Option<u64>,
    /// 描画したラベル数
    pub drawn: usize,
    pub notice: Option<Notice>,
}

impl FrameReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

pub struct ArRenderer<S: TrackingSession> {
    session: S,
    placer: AnchorPlacer,
    pipeline: InferencePipeline<ImageOf<S>>,
    anchors: LabeledAnchorSet<AnchorOf<S::Frame>>,
    scan: ScanConfig,
    inference: InferenceConfig,
    scan_requested: bool,
    /// 処理中の画像に渡した回転
    in_flight_rotation: i32,
}

impl<S: TrackingSession> ArRenderer<S> {
    pub fn new(session: S, pipeline: InferencePipeline<ImageOf<S>>, config: &Config) -> Self {
        Self {
            session,
            placer: AnchorPlacer::new(),
            pipeline,
            anchors: LabeledAnchorSet::new(),
            scan: config.scan.clone(),
            inference: config.inference.clone(),
            scan_requested: true,
            in_flight_rotation: 0,
        }
    }

    /// 描画側と共有するアンカー集合のハンドル
    pub fn anchors(&self) -> LabeledAnchorSet<AnchorOf<S::Frame>> {
        self.anchors.clone()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn inference_state(&self) -> InferenceState {
        self.pipeline.state()
    }

    pub fn request_scan(&mut self) {
        self.scan_requested = true;
    }

    pub fn is_scan_requested(&self) -> bool {
        self.scan_requested
    }

    /// 表示中のアンカーがあればリセット可能
    pub fn can_reset(&self) -> bool {
        !self.anchors.is_empty()
    }

    /// 表示中のアンカーを全て破棄する
    pub fn reset(&mut self) -> bool {
        let cleared = self.anchors.clear();
        info!(cleared, "labeled anchors reset");
        cleared
    }

    /// 処理中の推論を最大 `timeout` 待つ（フレームループ外で使う）
    pub fn wait_for_inference(&mut self, timeout: Duration) -> Result<InferenceState> {
        self.pipeline.wait(timeout)
    }

    /// 1フレーム分の処理
    ///
    /// カメラが使えないフレームはスキップして通知を返す。それ以外のエンジンエラーと
    /// 推論エラーはそのまま返す。
    pub fn draw_frame(&mut self, sink: &mut dyn LabelSink) -> Result<FrameReport> {
        let frame = match self.session.update() {
            Ok(frame) => frame,
            Err(e) if e.is_frame_unavailable() => {
                warn!(error = %e, "camera not available during frame update");
                let mut report = FrameReport::skipped(SkipReason::CameraUnavailable);
                report.notice = Some(Notice::CameraUnavailable);
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        if !frame.camera_tracking_state().is_tracking() {
            debug!(state = ?frame.camera_tracking_state(), "camera not tracking, skipping frame");
            return Ok(FrameReport::skipped(SkipReason::NotTracking));
        }

        let mut report = FrameReport::default();

        if self.scan_requested && self.pipeline.is_idle() {
            // NotYetAvailable は「このフレームは結果なし」
            if let Some(image) = frame.acquire_camera_image().into_result()? {
                let rotation = if self.inference.rotate_to_upright {
                    self.session.camera_sensor_to_display_rotation()
                } else {
                    0
                };
                report.submitted = self.pipeline.submit(image, rotation)?;
                if report.submitted {
                    self.in_flight_rotation = rotation;
                }
            }
        }

        self.pipeline.poll()?;
        if let Some(landmarks) = self.pipeline.take_result() {
            let (version, notice) = self.publish_landmarks(landmarks, &frame)?;
            report.published = Some(version);
            report.notice = notice;
        }

        let camera_pose = frame.camera_pose();
        let batch = self.anchors.snapshot();
        for entry in batch.drawable() {
            sink.draw_label(&entry.label, &entry.anchor.pose(), &camera_pose);
            report.drawn += 1;
        }

        Ok(report)
    }

    fn publish_landmarks(&mut self, landmarks: Vec<Landmark>, frame: &S::Frame) -> Result<(u64, Option<Notice>)> {
        let min_likelihood = self.inference.min_likelihood;
        let mut detected: Vec<Landmark> = landmarks
            .into_iter()
            .filter(|lm| lm.is_likely(min_likelihood))
            .collect();

        if self.in_flight_rotation != 0 {
            let (width, height) = frame.image_size();
            detected = remap_landmarks(&detected, width, height, self.in_flight_rotation)?;
        }

        let placed = self.placer.place_landmarks(&detected, frame)?;
        let notice = if detected.is_empty() {
            Some(Notice::NoLandmarks)
        } else if placed.len() != detected.len() {
            Some(Notice::NotAnchored {
                detected: detected.len(),
                anchored: placed.len(),
            })
        } else {
            None
        };

        info!(detected = detected.len(), anchored = placed.len(), "landmarks anchored");
        let version = self.anchors.publish(placed);

        if !self.scan.continuous {
            self.scan_requested = false;
        }
        Ok((version, notice))
    }
}
