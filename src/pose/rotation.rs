use anyhow::{bail, Result};

use super::landmark::Landmark;

/// 回転角を 0/90/180/270 に正規化
pub fn normalize_rotation(rotation_degrees: i32) -> Result<i32> {
    let r = rotation_degrees.rem_euclid(360);
    if r % 90 != 0 {
        bail!("Rotation must be a multiple of 90 degrees, got {}", rotation_degrees);
    }
    Ok(r)
}

/// 正立画像の座標をセンサー画像の座標に戻す
///
/// センサー画像 (sensor_width x sensor_height) を時計回りに `rotation_degrees`
/// 回転したものが正立画像。
pub fn upright_to_sensor(
    x: f32,
    y: f32,
    sensor_width: u32,
    sensor_height: u32,
    rotation_degrees: i32,
) -> Result<(f32, f32)> {
    let w = sensor_width as f32;
    let h = sensor_height as f32;
    let point = match normalize_rotation(rotation_degrees)? {
        0 => (x, y),
        90 => (y, h - x),
        180 => (w - x, h - y),
        _ => (w - y, x),
    };
    Ok(point)
}

/// センサー画像の座標を正立画像の座標に変換（`upright_to_sensor` の逆）
pub fn sensor_to_upright(
    x: f32,
    y: f32,
    sensor_width: u32,
    sensor_height: u32,
    rotation_degrees: i32,
) -> Result<(f32, f32)> {
    let w = sensor_width as f32;
    let h = sensor_height as f32;
    let point = match normalize_rotation(rotation_degrees)? {
        0 => (x, y),
        90 => (h - y, x),
        180 => (w - x, h - y),
        _ => (y, w - x),
    };
    Ok(point)
}

/// ランドマーク群をセンサー画像座標に変換
pub fn remap_landmarks(
    landmarks: &[Landmark],
    sensor_width: u32,
    sensor_height: u32,
    rotation_degrees: i32,
) -> Result<Vec<Landmark>> {
    landmarks
        .iter()
        .map(|lm| {
            let (x, y) =
                upright_to_sensor(lm.position[0], lm.position[1], sensor_width, sensor_height, rotation_degrees)?;
            let mut remapped = *lm;
            remapped.position = [x, y];
            remapped.position_3d[0] = x;
            remapped.position_3d[1] = y;
            Ok(remapped)
        })
        .collect()
}
