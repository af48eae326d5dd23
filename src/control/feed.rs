use crossbeam::channel::{self, Sender};
use log::{debug, warn};
use serde::Deserialize;
use std::io::BufRead;
use std::thread::{self, JoinHandle};

use crate::control::feature::FeatureFrame;
use crate::control::modulation::{ChannelDetector, DetectorError, FeedItem};
use crate::control::rig::Command;
use crate::control::selection::Effect;

/// One line of the JSON-lines feed written by the detection process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedLine {
    Frame(FeatureFrame),
    /// Every face found in a frame. Only the first one drives modulation.
    Detections { faces: Vec<FeatureFrame> },
    NoDetection,
    Error { message: String },
    SelectEffect { effect: Effect },
    SetInputDevice { device: String },
    ToggleConvolution { enabled: bool },
    ResetCalibration,
}

impl From<FeedLine> for FeedItem {
    fn from(line: FeedLine) -> Self {
        match line {
            FeedLine::Frame(frame) => Self::Detection(Ok(Some(frame))),
            FeedLine::Detections { faces } => Self::Detection(Ok(faces.into_iter().next())),
            FeedLine::NoDetection => Self::Detection(Ok(None)),
            FeedLine::Error { message } => Self::Detection(Err(DetectorError::new(message))),
            FeedLine::SelectEffect { effect } => Self::Command(Command::SelectEffect(effect)),
            FeedLine::SetInputDevice { device } => Self::Command(Command::SetInputDevice(device)),
            FeedLine::ToggleConvolution { enabled } => {
                Self::Command(Command::ToggleConvolution(enabled))
            }
            FeedLine::ResetCalibration => Self::Command(Command::ResetCalibration),
        }
    }
}

pub struct Feed {
    pub detector: ChannelDetector,
    pub reader: JoinHandle<()>,
}

/// Reads the feed on its own thread and hands each line to the detector in order.
///
/// The channel has a single slot, so the reader only moves on once the modulation loop
/// has taken the previous item. Malformed lines are logged and skipped.
pub fn spawn_feed<R: BufRead + Send + 'static>(input: R) -> Feed {
    let (items_tx, items_rx) = channel::bounded(1);
    let reader = thread::spawn(move || read_feed(input, &items_tx));

    Feed {
        detector: ChannelDetector::new(items_rx),
        reader,
    }
}

fn read_feed<R: BufRead>(input: R, items: &Sender<FeedItem>) {
    for (number, line) in input.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Feed read failed: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed: FeedLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping feed line {}: {e}", number + 1);
                continue;
            }
        };

        if items.send(parsed.into()).is_err() {
            debug!("Feed consumer gone, stopping reader");
            return;
        }
    }
    debug!("Feed closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::modulation::{Detector, DetectorEvent};
    use std::io::Cursor;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn parses_every_line_kind() -> anyhow::Result<()> {
        let frame: FeedLine = serde_json::from_str(
            r#"{"type": "frame", "regions": {"mouth": [{"x": 0, "y": 3}]}}"#,
        )?;
        assert!(matches!(frame, FeedLine::Frame(_)));

        let select: FeedLine =
            serde_json::from_str(r#"{"type": "select_effect", "effect": "pitch_shift"}"#)?;
        assert_eq!(
            select,
            FeedLine::SelectEffect {
                effect: Effect::PitchShift
            }
        );

        let none: FeedLine = serde_json::from_str(r#"{"type": "no_detection"}"#)?;
        assert_eq!(none, FeedLine::NoDetection);
        Ok(())
    }

    #[test]
    fn keeps_feed_order_across_kinds() {
        let input = concat!(
            "{\"type\": \"select_effect\", \"effect\": \"wah\"}\n",
            "not json\n",
            "\n",
            "{\"type\": \"frame\", \"regions\": ",
            "{\"mouth\": [{\"x\": 0, \"y\": 1}, {\"x\": 0, \"y\": 9}]}}\n",
            "{\"type\": \"reset_calibration\"}\n",
            "{\"type\": \"error\", \"message\": \"model crashed\"}\n",
        );
        let Feed { mut detector, reader } = spawn_feed(Cursor::new(input));

        assert_eq!(
            detector.next_event(WAIT),
            Ok(DetectorEvent::Command(Command::SelectEffect(Effect::Wah)))
        );

        let Ok(DetectorEvent::Frame(Some(frame))) = detector.next_event(WAIT) else {
            panic!("expected a frame");
        };
        assert_eq!(frame.vertical_extent("mouth"), Some(8.0));

        assert_eq!(
            detector.next_event(WAIT),
            Ok(DetectorEvent::Command(Command::ResetCalibration))
        );
        assert_eq!(
            detector.next_event(WAIT),
            Err(DetectorError::new("model crashed"))
        );
        assert_eq!(detector.next_event(WAIT), Ok(DetectorEvent::Closed));

        reader.join().unwrap();
    }

    #[test]
    fn only_first_face_is_used() {
        let input = concat!(
            "{\"type\": \"detections\", \"faces\": [",
            "{\"regions\": {\"mouth\": [{\"x\": 0, \"y\": 0}, {\"x\": 0, \"y\": 4}]}},",
            "{\"regions\": {\"mouth\": [{\"x\": 0, \"y\": 0}, {\"x\": 0, \"y\": 40}]}}",
            "]}\n",
            "{\"type\": \"detections\", \"faces\": []}\n",
        );
        let Feed { mut detector, .. } = spawn_feed(Cursor::new(input));

        let Ok(DetectorEvent::Frame(Some(frame))) = detector.next_event(WAIT) else {
            panic!("expected a frame");
        };
        assert_eq!(frame.vertical_extent("mouth"), Some(4.0));
        assert_eq!(detector.next_event(WAIT), Ok(DetectorEvent::Frame(None)));
    }

    #[test]
    fn detector_without_restart_hook_refuses_restart() {
        let Feed { mut detector, .. } = spawn_feed(Cursor::new(""));
        assert!(detector.restart().is_err());
    }
}
