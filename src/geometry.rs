use nalgebra::{Point3, UnitQuaternion, Vector3};

/// ワールド空間での姿勢（位置 + 回転）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldPose {
    /// 位置 (x, y, z) メートル
    pub position: [f32; 3],
    /// 回転 (クォータニオン: x, y, z, w)
    pub rotation: [f32; 4],
}

impl WorldPose {
    pub fn new(position: [f32; 3], rotation: [f32; 4]) -> Self {
        Self { position, rotation }
    }

    /// 原点、回転なし
    pub fn identity() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// 回転なしの平行移動のみ
    pub fn from_translation(position: [f32; 3]) -> Self {
        Self {
            position,
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn from_isometry(position: Point3<f32>, rotation: UnitQuaternion<f32>) -> Self {
        let q = rotation.quaternion();
        Self {
            position: [position.x, position.y, position.z],
            rotation: [q.i, q.j, q.k, q.w],
        }
    }

    pub fn translation(&self) -> Vector3<f32> {
        Vector3::new(self.position[0], self.position[1], self.position[2])
    }

    pub fn unit_rotation(&self) -> UnitQuaternion<f32> {
        let [x, y, z, w] = self.rotation;
        UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(w, x, y, z))
    }

    /// 2つの姿勢間の位置距離
    pub fn distance_to(&self, other: &WorldPose) -> f32 {
        (self.translation() - other.translation()).norm()
    }
}

impl Default for WorldPose {
    fn default() -> Self {
        Self::identity()
    }
}

/// 2D座標系のタグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coordinates2d {
    /// カメラ画像のピクセル座標
    ImagePixels,
    /// カメラ画像の正規化座標 (0.0〜1.0)
    ImageNormalized,
    /// 表示ビューのピクセル座標
    View,
    /// 表示ビューの正規化座標 (0.0〜1.0)
    ViewNormalized,
}

/// カメラ画像ピクセル空間の点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelCoordinate {
    pub x: f32,
    pub y: f32,
}

impl PixelCoordinate {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// ビュー空間の点。座標変換の中間値としてのみ使う
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewCoordinate {
    pub x: f32,
    pub y: f32,
}

impl ViewCoordinate {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}
