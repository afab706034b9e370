use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::BackendError;
use crate::error::Error;
use crate::pce::{ClusterToken, EnforcementMode};

/// Payload of the secret record kept for every provisioned cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSecret {
    pub cluster_name: String,
    pub cluster_href: String,
    pub cluster_id: String,
    pub cluster_token: ClusterToken,
    pub namespace: String,
    pub service_account: String,
    #[serde(default)]
    pub enforcement_mode: EnforcementMode,
    pub created_at: DateTime<Utc>,
}

impl ClusterSecret {
    pub fn to_data(&self) -> Result<Map<String, Value>, Error> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(Error::secret(BackendError::Client(
                "cluster secret did not serialize to an object".to_string(),
            ))),
            Err(e) => Err(Error::secret(BackendError::Client(e.to_string()))),
        }
    }

    pub fn from_data(data: &Map<String, Value>) -> Result<Self, Error> {
        serde_json::from_value(Value::Object(data.clone())).map_err(|e| {
            Error::secret(BackendError::Decode(format!("malformed cluster secret: {}", e)))
        })
    }
}
