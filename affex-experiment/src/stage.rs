use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Size of the play area and of the target, injected instead of read from a
/// live layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageDimensions {
    pub width: f32,
    pub height: f32,
    pub target_width: f32,
    pub target_height: f32,
}

impl Default for StageDimensions {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            target_width: 100.0,
            target_height: 100.0,
        }
    }
}

/// Where and how the target is drawn for one appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPlacement {
    pub image: String,
    pub x: f32,
    pub y: f32,
}

impl TargetPlacement {
    pub fn to_metadata(&self) -> Value {
        json!({
            "image": self.image,
            "x": (f64::from(self.x) * 10.0).round() / 10.0,
            "y": (f64::from(self.y) * 10.0).round() / 10.0,
        })
    }
}

impl StageDimensions {
    /// Picks one of `images` target pictures and a position keeping the
    /// target fully on stage.
    pub fn place_target<R: Rng>(&self, rng: &mut R, images: u32) -> TargetPlacement {
        let n = rng.random_range(1..=images.max(1));
        let max_x = (self.width - self.target_width).max(0.0);
        let max_y = (self.height - self.target_height).max(0.0);
        TargetPlacement {
            image: format!("image{n}.png"),
            x: if max_x > 0.0 { rng.random_range(0.0..=max_x) } else { 0.0 },
            y: if max_y > 0.0 { rng.random_range(0.0..=max_y) } else { 0.0 },
        }
    }
}
