use anyhow::Result;

use super::landmark::Landmark;

/// 姿勢推論器
///
/// 推論は遅い可能性があるため、ワーカースレッド上で呼ばれる。
pub trait PoseAnalyzer<I>: Send {
    /// 画像からランドマークを検出する
    ///
    /// `rotation_degrees`: 画像を正立させるための時計回り回転（度）。
    /// 返す座標は正立画像のピクセル座標。
    fn analyze(&mut self, image: &I, rotation_degrees: i32) -> Result<Vec<Landmark>>;
}

impl<I, F> PoseAnalyzer<I> for F
where
    F: FnMut(&I, i32) -> Result<Vec<Landmark>> + Send,
{
    fn analyze(&mut self, image: &I, rotation_degrees: i32) -> Result<Vec<Landmark>> {
        self(image, rotation_degrees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::LandmarkType;

    #[test]
    fn test_closure_is_analyzer() {
        let mut analyzer = |image: &u32, rotation: i32| -> Result<Vec<Landmark>> {
            Ok(vec![Landmark::new(LandmarkType::Nose, *image as f32, rotation as f32, 1.0)])
        };
        let landmarks = PoseAnalyzer::analyze(&mut analyzer, &5u32, 90).unwrap();
        assert_eq!(landmarks.len(), 1);
        assert_eq!(landmarks[0].position, [5.0, 90.0]);
    }
}
