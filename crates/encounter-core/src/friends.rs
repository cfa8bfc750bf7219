//! Friend directory: beacon identifiers to friend identities.
//!
//! The directory is configured from a single CSV string whose records look like
//! `name-majorId-minorId[-tag]`, for example `"Sam-100-200, Lee-100-300-lee-tag"`.
//! It is rebuilt wholesale whenever that string changes.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::error::{EncounterError, Result};

/// Records are separated by a comma and any number of following spaces.
static RECORD_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r", *").expect("static pattern is valid"));

/// A beacon-tagged peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "Sam",
    "major_id": "100",
    "minor_id": "200",
    "tag": "100-200"
}))]
pub struct Friend {
    /// Stable friend name; the key of that friend's encounter.
    pub name: String,

    /// Beacon major identifier, matched exactly.
    pub major_id: String,

    /// Beacon minor identifier, matched as a suffix.
    pub minor_id: String,

    /// Beacon tag reported downstream; `majorId-minorId` unless given.
    pub tag: String,
}

impl Friend {
    /// Returns `true` if this friend carries the given beacon identifiers.
    ///
    /// The supplied minor id may carry a vendor prefix.
    #[must_use]
    pub fn matches(&self, major_id: &str, minor_id: &str) -> bool {
        self.major_id == major_id && minor_id.ends_with(&self.minor_id)
    }
}

impl FromStr for Friend {
    type Err = EncounterError;

    fn from_str(record: &str) -> Result<Self> {
        let parts: Vec<&str> = record.splitn(4, '-').collect();
        // An empty minor id would suffix-match every beacon.
        if parts.len() < 3 || parts[..3].iter().any(|field| field.is_empty()) {
            return Err(EncounterError::MalformedFriendRecord {
                record: record.to_string(),
                fields: parts.len(),
            });
        }

        let tag = parts
            .get(3)
            .filter(|t| !t.is_empty())
            .map_or_else(|| format!("{}-{}", parts[1], parts[2]), |t| (*t).to_string());

        Ok(Self {
            name: parts[0].to_string(),
            major_id: parts[1].to_string(),
            minor_id: parts[2].to_string(),
            tag,
        })
    }
}

impl fmt::Display for Friend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Friend({}, {}-{}, {})",
            self.name, self.major_id, self.minor_id, self.tag
        )
    }
}

/// Ordered list of known friends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FriendDirectory {
    friends: Vec<Friend>,
    source: String,
}

fn records(csv: &str) -> impl Iterator<Item = &str> {
    RECORD_SEPARATOR
        .split(csv)
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

impl FriendDirectory {
    /// Parse a friend list, rejecting it if any record is malformed.
    ///
    /// Use this to validate caller input before storing it.
    ///
    /// # Errors
    ///
    /// Returns [`EncounterError::MalformedFriendRecord`] for the first bad record.
    pub fn parse(csv: &str) -> Result<Self> {
        let friends = records(csv)
            .map(str::parse::<Friend>)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            friends,
            source: csv.to_string(),
        })
    }

    /// Parse a friend list, dropping malformed records with a warning.
    ///
    /// Used for lists that were already persisted, where rejecting the whole
    /// list would leave the tracker with no friends at all.
    #[must_use]
    pub fn parse_lenient(csv: &str) -> Self {
        let friends = records(csv)
            .filter_map(|record| match record.parse::<Friend>() {
                Ok(friend) => Some(friend),
                Err(err) => {
                    warn!(error = %err, "dropping malformed friend record");
                    None
                }
            })
            .collect();
        Self {
            friends,
            source: csv.to_string(),
        }
    }

    /// Find the first friend with this major id whose minor id is a suffix of `minor_id`.
    ///
    /// Returns `None` if either id is absent.
    #[must_use]
    pub fn resolve(&self, major_id: Option<&str>, minor_id: Option<&str>) -> Option<&Friend> {
        let (major_id, minor_id) = (major_id?, minor_id?);
        self.friends.iter().find(|f| f.matches(major_id, minor_id))
    }

    /// Look up a friend by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Friend> {
        self.friends.iter().find(|f| f.name == name)
    }

    /// All friends in list order.
    #[must_use]
    pub fn friends(&self) -> &[Friend] {
        &self.friends
    }

    /// The CSV this directory was built from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of friends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.friends.len()
    }

    /// Returns `true` if no friends are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }
}
