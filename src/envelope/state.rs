//! Envelope persistence snapshot.
//!
//! `Envelope` already derives `Serialize`/`Deserialize`; this module just
//! gives that a stable, versioned entry point so the persistence adapter
//! boundary (`StateDict`) doesn't leak `serde_json::Value` shape changes
//! directly onto callers.

use super::Envelope;
use crate::types::{Error, Result};
use serde_json::{Map, Value};

/// Opaque persisted-state representation handed to a [`crate::persistence::PersistenceAdapter`].
pub type StateDict = Map<String, Value>;

const STATE_DICT_VERSION: i64 = 1;

impl Envelope {
    /// Serialize the full envelope (including the audit trail) into a
    /// versioned [`StateDict`].
    pub fn to_state_dict(&self) -> Result<StateDict> {
        let value = serde_json::to_value(self)?;
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::internal(format!(
                    "envelope serialized to non-object value: {other}"
                )))
            }
        };
        map.insert(
            "__state_dict_version".to_string(),
            Value::from(STATE_DICT_VERSION),
        );
        Ok(map)
    }

    /// Reconstruct an envelope from a [`StateDict`] produced by [`Envelope::to_state_dict`].
    pub fn from_state_dict(mut dict: StateDict) -> Result<Self> {
        dict.remove("__state_dict_version");
        let envelope: Envelope = serde_json::from_value(Value::Object(dict))?;
        Ok(envelope)
    }
}
