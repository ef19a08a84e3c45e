use anyhow::{anyhow, bail, Context, Result};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::pose::{Landmark, PoseAnalyzer};

/// 推論パイプラインの状態
///
/// 遷移は制御スレッドからのみ:
/// Idle --submit--> Awaiting --poll--> ResultReady --take_result--> Idle
/// 推論失敗時は Awaiting から Idle に戻る。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceState {
    Idle,
    Awaiting,
    ResultReady,
}

struct InferenceRequest<I> {
    image: I,
    rotation_degrees: i32,
    submitted_at: Instant,
}

struct InferenceOutcome {
    landmarks: Result<Vec<Landmark>>,
    latency: Duration,
}

/// 推論を1本のワーカースレッドで実行する。同時に処理中の画像は高々1枚
pub struct InferencePipeline<I> {
    state: InferenceState,
    ready: Option<Vec<Landmark>>,
    request_tx: Option<mpsc::SyncSender<InferenceRequest<I>>>,
    result_rx: mpsc::Receiver<InferenceOutcome>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<I: Send + 'static> InferencePipeline<I> {
    /// ワーカースレッドを起動する
    pub fn spawn<A>(mut analyzer: A) -> Result<Self>
    where
        A: PoseAnalyzer<I> + 'static,
    {
        // 容量1: キューに画像を溜めない
        let (request_tx, request_rx) = mpsc::sync_channel::<InferenceRequest<I>>(1);
        let (result_tx, result_rx) = mpsc::channel::<InferenceOutcome>();

        let worker = thread::Builder::new()
            .name("pose-inference".to_string())
            .spawn(move || {
                while let Ok(req) = request_rx.recv() {
                    let landmarks = analyzer.analyze(&req.image, req.rotation_degrees);
                    let outcome = InferenceOutcome {
                        landmarks,
                        latency: req.submitted_at.elapsed(),
                    };
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
                debug!("inference worker stopped");
            })
            .context("Failed to spawn inference thread")?;

        info!("inference worker started");
        Ok(Self {
            state: InferenceState::Idle,
            ready: None,
            request_tx: Some(request_tx),
            result_rx,
            worker: Some(worker),
        })
    }

    pub fn state(&self) -> InferenceState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == InferenceState::Idle
    }

    /// Idle のときだけ画像を送る。送らなかった場合は false を返し、画像は捨てる
    pub fn submit(&mut self, image: I, rotation_degrees: i32) -> Result<bool> {
        if self.state != InferenceState::Idle {
            return Ok(false);
        }

        let tx = self
            .request_tx
            .as_ref()
            .ok_or_else(|| anyhow!("Inference worker already shut down"))?;
        let req = InferenceRequest {
            image,
            rotation_degrees,
            submitted_at: Instant::now(),
        };
        match tx.try_send(req) {
            Ok(()) => {}
            Err(mpsc::TrySendError::Full(_)) => bail!("Inference queue unexpectedly full"),
            Err(mpsc::TrySendError::Disconnected(_)) => bail!("Inference worker disconnected"),
        }

        self.state = InferenceState::Awaiting;
        debug!(rotation_degrees, "image submitted for inference");
        Ok(true)
    }

    /// 完了した推論を取り込む（ブロックしない）
    pub fn poll(&mut self) -> Result<InferenceState> {
        if self.state != InferenceState::Awaiting {
            return Ok(self.state);
        }
        match self.result_rx.try_recv() {
            Ok(outcome) => self.accept(outcome),
            Err(mpsc::TryRecvError::Empty) => Ok(self.state),
            Err(mpsc::TryRecvError::Disconnected) => {
                self.state = InferenceState::Idle;
                bail!("Inference worker disconnected")
            }
        }
    }

    /// 最大 `timeout` だけ推論完了を待つ
    pub fn wait(&mut self, timeout: Duration) -> Result<InferenceState> {
        if self.state != InferenceState::Awaiting {
            return Ok(self.state);
        }
        match self.result_rx.recv_timeout(timeout) {
            Ok(outcome) => self.accept(outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(self.state),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.state = InferenceState::Idle;
                bail!("Inference worker disconnected")
            }
        }
    }

    /// 結果を取り出して Idle に戻る。ResultReady 以外では None
    pub fn take_result(&mut self) -> Option<Vec<Landmark>> {
        if self.state != InferenceState::ResultReady {
            return None;
        }
        self.state = InferenceState::Idle;
        self.ready.take()
    }

    fn accept(&mut self, outcome: InferenceOutcome) -> Result<InferenceState> {
        let latency_ms = outcome.latency.as_secs_f32() * 1000.0;
        match outcome.landmarks {
            Ok(landmarks) => {
                debug!(count = landmarks.len(), latency_ms, "inference completed");
                self.ready = Some(landmarks);
                self.state = InferenceState::ResultReady;
                Ok(self.state)
            }
            Err(e) => {
                warn!(latency_ms, error = %e, "inference failed");
                self.state = InferenceState::Idle;
                Err(e.context("Pose inference failed"))
            }
        }
    }
}

impl<I> Drop for InferencePipeline<I> {
    fn drop(&mut self) {
        // 送信側を閉じるとワーカーのループが終わる
        self.request_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::LandmarkType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(5);

    fn nose_at(x: f32) -> Vec<Landmark> {
        vec![Landmark::new(LandmarkType::Nose, x, 0.0, 1.0)]
    }

    fn echo(x: &f32, _rotation: i32) -> Result<Vec<Landmark>> {
        Ok(nose_at(*x))
    }

    #[test]
    fn test_initial_state_is_idle() {
        let pipeline = InferencePipeline::<f32>::spawn(echo).unwrap();
        assert_eq!(pipeline.state(), InferenceState::Idle);
        assert!(pipeline.is_idle());
    }

    #[test]
    fn test_full_cycle() {
        let mut pipeline = InferencePipeline::<f32>::spawn(echo).unwrap();

        assert!(pipeline.submit(3.0, 0).unwrap());
        assert_eq!(pipeline.state(), InferenceState::Awaiting);
        assert_eq!(pipeline.wait(WAIT).unwrap(), InferenceState::ResultReady);

        let result = pipeline.take_result().unwrap();
        assert_eq!(result[0].position, [3.0, 0.0]);
        assert_eq!(pipeline.state(), InferenceState::Idle);
        assert!(pipeline.take_result().is_none());
    }

    #[test]
    fn test_second_submit_rejected_while_pending() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = Arc::clone(&calls);
        let mut pipeline = InferencePipeline::<f32>::spawn(move |x: &f32, _r: i32| -> Result<Vec<Landmark>> {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(nose_at(*x))
        })
        .unwrap();

        assert!(pipeline.submit(1.0, 0).unwrap());
        assert!(!pipeline.submit(2.0, 0).unwrap());
        assert_eq!(pipeline.wait(WAIT).unwrap(), InferenceState::ResultReady);

        // 結果を取り出すまでは ResultReady のまま、新規送信も不可
        assert!(!pipeline.submit(3.0, 0).unwrap());
        let result = pipeline.take_result().unwrap();
        assert_eq!(result[0].position, [1.0, 0.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rotation_is_forwarded() {
        let mut pipeline = InferencePipeline::<f32>::spawn(|_x: &f32, r: i32| -> Result<Vec<Landmark>> {
            Ok(nose_at(r as f32))
        })
        .unwrap();
        pipeline.submit(0.0, 270).unwrap();
        pipeline.wait(WAIT).unwrap();
        assert_eq!(pipeline.take_result().unwrap()[0].position[0], 270.0);
    }

    #[test]
    fn test_failure_returns_to_idle() {
        let mut pipeline = InferencePipeline::<f32>::spawn(|x: &f32, _r: i32| -> Result<Vec<Landmark>> {
            if *x < 0.0 {
                anyhow::bail!("bad image");
            }
            Ok(nose_at(*x))
        })
        .unwrap();

        pipeline.submit(-1.0, 0).unwrap();
        let err = pipeline.wait(WAIT).unwrap_err();
        assert!(format!("{:#}", err).contains("bad image"));
        assert_eq!(pipeline.state(), InferenceState::Idle);

        // 失敗後も次の推論は可能
        assert!(pipeline.submit(2.0, 0).unwrap());
        assert_eq!(pipeline.wait(WAIT).unwrap(), InferenceState::ResultReady);
    }

    #[test]
    fn test_poll_when_idle_is_noop() {
        let mut pipeline = InferencePipeline::<f32>::spawn(echo).unwrap();
        assert_eq!(pipeline.poll().unwrap(), InferenceState::Idle);
    }
}
