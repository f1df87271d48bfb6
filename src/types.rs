//! Common value types exchanged across the PHD2 guider client.

use serde::{Deserialize, Serialize};

/// Rectangular sensor region for single-frame capture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subframe {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Subframe {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The `[x, y, width, height]` array shape PHD2 expects for `subframe`.
    pub fn to_array(self) -> [i32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// PHD2 equipment profile, as returned by `get_profile`/`get_profiles`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: i32,
    pub name: String,
}

/// Outcome of a `capture_single_frame` request, delivered via the
/// `SingleFrameComplete` event.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleFrameResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub path: Option<String>,
}

/// Progress of a settle in flight after `Guide`/`Dither`, or its final
/// outcome once `Done` becomes true.
#[derive(Debug, Clone, PartialEq)]
pub struct SettleProgress {
    pub done: bool,
    pub distance: f64,
    pub settle_px: f64,
    pub time: f64,
    pub settle_time: f64,
    pub status: i32,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subframe_array_shape() {
        let s = Subframe::new(30, 30, 100, 100);
        assert_eq!(s.to_array(), [30, 30, 100, 100]);
    }

    #[test]
    fn profile_parsing() {
        let json = r#"{"id":1,"name":"Simulator"}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id, 1);
        assert_eq!(profile.name, "Simulator");
    }
}
