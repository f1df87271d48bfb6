//! PHD2 event types and application state.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// PHD2 application state, mirrored from the server's `AppState` event and
/// `get_app_state` RPC result. Values PHD2 emits that aren't named here
/// (the set isn't enumerated by PHD2's own documentation) pass through as
/// `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    Stopped,
    Selected,
    Calibrating,
    Guiding,
    LostLock,
    Paused,
    Looping,
    Settling,
    Other(String),
}

impl Default for AppState {
    fn default() -> Self {
        AppState::Other(String::new())
    }
}

impl AppState {
    pub fn is_guiding(&self) -> bool {
        matches!(self, AppState::Guiding | AppState::LostLock)
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppState::Stopped => write!(f, "Stopped"),
            AppState::Selected => write!(f, "Selected"),
            AppState::Calibrating => write!(f, "Calibrating"),
            AppState::Guiding => write!(f, "Guiding"),
            AppState::LostLock => write!(f, "LostLock"),
            AppState::Paused => write!(f, "Paused"),
            AppState::Looping => write!(f, "Looping"),
            AppState::Settling => write!(f, "Settling"),
            AppState::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::str::FromStr for AppState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Stopped" => AppState::Stopped,
            "Selected" => AppState::Selected,
            "Calibrating" => AppState::Calibrating,
            "Guiding" => AppState::Guiding,
            "LostLock" => AppState::LostLock,
            "Paused" => AppState::Paused,
            "Looping" => AppState::Looping,
            "Settling" => AppState::Settling,
            other => AppState::Other(other.to_string()),
        })
    }
}

/// Guide step sample. `ra_distance_raw`/`dec_distance_raw`/`avg_dist` are
/// required because the reader unconditionally feeds them into the running
/// accumulators and the derived `AvgDist` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GuideStepStats {
    pub frame: u64,
    pub time: f64,
    pub mount: String,
    #[serde(rename = "RADistanceRaw")]
    pub ra_distance_raw: f64,
    #[serde(rename = "DECDistanceRaw")]
    pub dec_distance_raw: f64,
    #[serde(rename = "AvgDist")]
    pub avg_dist: f64,
    #[serde(rename = "RADistanceGuide")]
    pub ra_distance_guide: Option<f64>,
    #[serde(rename = "DECDistanceGuide")]
    pub dec_distance_guide: Option<f64>,
    #[serde(rename = "StarMass")]
    pub star_mass: Option<f64>,
    #[serde(rename = "SNR")]
    pub snr: Option<f64>,
    #[serde(rename = "HFD")]
    pub hfd: Option<f64>,
}

/// PHD2 event notification. Events not named here still parse, via
/// `Other`, so that an unrecognized `Event` value never fails JSON parsing
/// of an otherwise well-formed line; the raw event name and payload are
/// kept in case a caller wants to inspect them.
#[derive(Debug, Clone)]
pub enum Phd2Event {
    Version {
        phd_version: String,
        phd_subver: Option<String>,
    },

    AppState {
        state: String,
    },

    StartGuiding,

    GuideStep(GuideStepStats),

    SettleBegin,

    Settling {
        distance: f64,
        time: f64,
        settle_time: f64,
    },

    SettleDone {
        status: i32,
        error: Option<String>,
    },

    Paused,

    StartCalibration,

    LoopingExposures {
        frame: Option<u64>,
    },

    LoopingExposuresStopped,

    GuidingStopped,

    StarLost {
        avg_dist: f64,
    },

    SingleFrameComplete {
        success: bool,
        error: Option<String>,
        path: Option<String>,
    },

    /// Catch-all for every event name this client doesn't act on.
    Other { event: String, rest: Value },
}

/// Every named event shape, matched against the `Event` tag. `Phd2Event`
/// wraps this with a fallback to `Other` for names not listed here, since
/// `#[serde(other)]` can only produce a unit variant and PHD2's event set
/// isn't closed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Event")]
enum KnownEvent {
    Version {
        #[serde(rename = "PHDVersion")]
        phd_version: String,
        #[serde(rename = "PHDSubver")]
        phd_subver: Option<String>,
    },

    AppState {
        #[serde(rename = "State")]
        state: String,
    },

    StartGuiding,

    GuideStep(GuideStepStats),

    SettleBegin,

    Settling {
        #[serde(rename = "Distance")]
        distance: f64,
        #[serde(rename = "Time")]
        time: f64,
        #[serde(rename = "SettleTime")]
        settle_time: f64,
    },

    SettleDone {
        #[serde(rename = "Status")]
        status: i32,
        #[serde(rename = "Error")]
        error: Option<String>,
    },

    Paused,

    StartCalibration,

    LoopingExposures {
        #[serde(rename = "Frame")]
        frame: Option<u64>,
    },

    LoopingExposuresStopped,

    GuidingStopped,

    StarLost {
        #[serde(rename = "AvgDist")]
        avg_dist: f64,
    },

    SingleFrameComplete {
        #[serde(rename = "Success")]
        success: bool,
        #[serde(rename = "Error")]
        error: Option<String>,
        #[serde(rename = "Path")]
        path: Option<String>,
    },
}

impl From<KnownEvent> for Phd2Event {
    fn from(ev: KnownEvent) -> Self {
        match ev {
            KnownEvent::Version { phd_version, phd_subver } => {
                Phd2Event::Version { phd_version, phd_subver }
            }
            KnownEvent::AppState { state } => Phd2Event::AppState { state },
            KnownEvent::StartGuiding => Phd2Event::StartGuiding,
            KnownEvent::GuideStep(stats) => Phd2Event::GuideStep(stats),
            KnownEvent::SettleBegin => Phd2Event::SettleBegin,
            KnownEvent::Settling { distance, time, settle_time } => {
                Phd2Event::Settling { distance, time, settle_time }
            }
            KnownEvent::SettleDone { status, error } => Phd2Event::SettleDone { status, error },
            KnownEvent::Paused => Phd2Event::Paused,
            KnownEvent::StartCalibration => Phd2Event::StartCalibration,
            KnownEvent::LoopingExposures { frame } => Phd2Event::LoopingExposures { frame },
            KnownEvent::LoopingExposuresStopped => Phd2Event::LoopingExposuresStopped,
            KnownEvent::GuidingStopped => Phd2Event::GuidingStopped,
            KnownEvent::StarLost { avg_dist } => Phd2Event::StarLost { avg_dist },
            KnownEvent::SingleFrameComplete { success, error, path } => {
                Phd2Event::SingleFrameComplete { success, error, path }
            }
        }
    }
}

impl<'de> Deserialize<'de> for Phd2Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match serde_json::from_value::<KnownEvent>(value.clone()) {
            Ok(known) => Ok(known.into()),
            Err(_) => {
                let event = value
                    .get("Event")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(Phd2Event::Other { event, rest: value })
            }
        }
    }
}

impl serde::Serialize for AppState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn app_state_round_trips_known_values() {
        for s in [
            "Stopped",
            "Selected",
            "Calibrating",
            "Guiding",
            "LostLock",
            "Paused",
            "Looping",
            "Settling",
        ] {
            assert_eq!(AppState::from_str(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn app_state_passes_through_unknown_values() {
        let s = AppState::from_str("SomethingNew").unwrap();
        assert_eq!(s.to_string(), "SomethingNew");
        assert!(matches!(s, AppState::Other(_)));
    }

    #[test]
    fn is_guiding_covers_guiding_and_lost_lock() {
        assert!(AppState::Guiding.is_guiding());
        assert!(AppState::LostLock.is_guiding());
        assert!(!AppState::Paused.is_guiding());
    }

    #[test]
    fn version_event_parses() {
        let line = r#"{"Event":"Version","PHDVersion":"2.6.13","PHDSubver":"a"}"#;
        let ev: Phd2Event = serde_json::from_str(line).unwrap();
        match ev {
            Phd2Event::Version {
                phd_version,
                phd_subver,
            } => {
                assert_eq!(phd_version, "2.6.13");
                assert_eq!(phd_subver.as_deref(), Some("a"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn guide_step_requires_numeric_fields() {
        let line = r#"{"Event":"GuideStep","Frame":1,"Time":1.0,"Mount":"Mount",
            "RADistanceRaw":1.0,"DECDistanceRaw":-1.0,"AvgDist":1.0}"#;
        let ev: Phd2Event = serde_json::from_str(line).unwrap();
        match ev {
            Phd2Event::GuideStep(stats) => {
                assert_eq!(stats.ra_distance_raw, 1.0);
                assert_eq!(stats.dec_distance_raw, -1.0);
                assert_eq!(stats.avg_dist, 1.0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_event_falls_through_to_other() {
        let line = r#"{"Event":"SomeFutureEvent","Whatever":1}"#;
        let ev: Phd2Event = serde_json::from_str(line).unwrap();
        match ev {
            Phd2Event::Other { event, rest } => {
                assert_eq!(event, "SomeFutureEvent");
                assert_eq!(rest.get("Whatever").and_then(Value::as_i64), Some(1));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn settling_event_has_no_star_locked_field() {
        let line = r#"{"Event":"Settling","Distance":3.1,"Time":1.0,"SettleTime":10.0}"#;
        let ev: Phd2Event = serde_json::from_str(line).unwrap();
        match ev {
            Phd2Event::Settling {
                distance,
                time,
                settle_time,
            } => {
                assert_eq!(distance, 3.1);
                assert_eq!(time, 1.0);
                assert_eq!(settle_time, 10.0);
            }
            _ => panic!("wrong variant"),
        }
    }
}
