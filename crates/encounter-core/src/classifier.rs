//! Beacon event classification.
//!
//! Raw detection records arrive from the detection SDK in batches. Only records
//! whose match payload names a known friend's beacon, and whose trigger kind is
//! `enter` or `exit`, become [`BeaconEvent`]s. Everything else is dropped by the
//! caller; a [`SkipReason`] says why, for the log.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::friends::{Friend, FriendDirectory};

/// Match payload key for the beacon major id.
pub const MAJOR_ID_KEY: &str = "majorId";

/// Match payload key for the beacon minor id.
pub const MINOR_ID_KEY: &str = "minorId";

/// Match payload key for the detection time in epoch milliseconds.
pub const TRIGGER_TIME_KEY: &str = "triggerTimeInMilli";

/// Direction of a beacon detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The beacon came into range.
    Enter,
    /// The beacon went out of range.
    Exit,
}

impl Direction {
    /// Parse the SDK's trigger kind; only the exact strings `enter` and `exit` qualify.
    #[must_use]
    pub fn from_trigger_kind(kind: &str) -> Option<Self> {
        match kind {
            "enter" => Some(Self::Enter),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }

    /// Wire name of this direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw detection record as delivered by the detection SDK.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "campaign_name": "beacon,kontakt,P01,Sam,enter",
    "trigger_kind": "enter",
    "match_payload": {
        "majorId": "100",
        "minorId": "0200",
        "triggerTimeInMilli": "1700000000000"
    }
}))]
pub struct RawTrigger {
    /// Free-text campaign name.
    #[serde(default)]
    pub campaign_name: String,

    /// Trigger kind, `enter` or `exit` for beacon detections.
    #[serde(default)]
    pub trigger_kind: Option<String>,

    /// Key/value payload describing what matched.
    #[serde(default)]
    pub match_payload: HashMap<String, String>,
}

impl RawTrigger {
    fn payload(&self, key: &str) -> Option<&str> {
        self.match_payload.get(key).map(String::as_str)
    }

    /// Detection time carried in the payload, if present and parseable.
    #[must_use]
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.payload(TRIGGER_TIME_KEY)
            .and_then(|millis| millis.trim().parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
    }
}

/// A classified enter/exit detection of a known friend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconEvent {
    /// The friend whose beacon was detected.
    pub friend: Friend,

    /// Enter or exit.
    pub direction: Direction,

    /// When the detection happened.
    pub observed_at: DateTime<Utc>,
}

/// Why a raw trigger did not become a [`BeaconEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The payload lacks a major or minor id; not a beacon trigger.
    MissingBeaconIds,
    /// The ids do not belong to any friend in the directory.
    UnknownFriend {
        /// Major id as received.
        major_id: String,
        /// Minor id as received.
        minor_id: String,
    },
    /// The trigger kind is absent or not exactly `enter`/`exit`.
    UnsupportedTriggerKind(Option<String>),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBeaconIds => f.write_str("no beacon ids in match payload"),
            Self::UnknownFriend { major_id, minor_id } => {
                write!(f, "beacon {major_id}/{minor_id} is not a known friend")
            }
            Self::UnsupportedTriggerKind(Some(kind)) => {
                write!(f, "unsupported trigger kind '{kind}'")
            }
            Self::UnsupportedTriggerKind(None) => f.write_str("missing trigger kind"),
        }
    }
}

/// Classify a raw trigger.
///
/// `received_at` stands in for the observation time when the payload carries
/// none. Pure: logging the skip is left to the caller.
///
/// # Errors
///
/// Returns the [`SkipReason`] when the trigger is not a beacon event of a known friend.
pub fn classify(
    raw: &RawTrigger,
    directory: &FriendDirectory,
    received_at: DateTime<Utc>,
) -> Result<BeaconEvent, SkipReason> {
    let (Some(major_id), Some(minor_id)) = (raw.payload(MAJOR_ID_KEY), raw.payload(MINOR_ID_KEY))
    else {
        return Err(SkipReason::MissingBeaconIds);
    };

    let friend = directory
        .resolve(Some(major_id), Some(minor_id))
        .ok_or_else(|| SkipReason::UnknownFriend {
            major_id: major_id.to_string(),
            minor_id: minor_id.to_string(),
        })?;

    let direction = raw
        .trigger_kind
        .as_deref()
        .and_then(Direction::from_trigger_kind)
        .ok_or_else(|| SkipReason::UnsupportedTriggerKind(raw.trigger_kind.clone()))?;

    Ok(BeaconEvent {
        friend: friend.clone(),
        direction,
        observed_at: raw.observed_at().unwrap_or(received_at),
    })
}

type Acknowledge = Box<dyn FnOnce(usize) + Send>;

/// A delivered batch of raw triggers.
///
/// The acknowledgement callback runs exactly once: on [`acknowledge`](Self::acknowledge),
/// or when the batch is dropped unacknowledged (including while unwinding).
pub struct TriggerBatch {
    triggers: Vec<RawTrigger>,
    ack: Option<Acknowledge>,
}

impl TriggerBatch {
    /// Wrap triggers with no acknowledgement callback.
    #[must_use]
    pub fn new(triggers: Vec<RawTrigger>) -> Self {
        Self {
            triggers,
            ack: None,
        }
    }

    /// Attach the callback that tells the SDK the batch was handled.
    ///
    /// It receives the number of triggers in the batch.
    #[must_use]
    pub fn on_acknowledge(mut self, ack: impl FnOnce(usize) + Send + 'static) -> Self {
        self.ack = Some(Box::new(ack));
        self
    }

    /// The raw triggers in delivery order.
    #[must_use]
    pub fn triggers(&self) -> &[RawTrigger] {
        &self.triggers
    }

    /// Mark the batch handled.
    pub fn acknowledge(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(ack) = self.ack.take() {
            ack(self.triggers.len());
        }
    }
}

impl Drop for TriggerBatch {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for TriggerBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerBatch")
            .field("triggers", &self.triggers)
            .field("acknowledged", &self.ack.is_none())
            .finish()
    }
}
