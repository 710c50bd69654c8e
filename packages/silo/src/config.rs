//! Silo option records.
//!
//! Every section has defaults so a config file only needs to name what it
//! changes. Durations are written in milliseconds under `*_ms` keys.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Full configuration of one silo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiloConfig {
    pub cluster: ClusterOptions,
    pub endpoint: EndpointOptions,
    pub membership: MembershipOptions,
    pub collection: CollectionOptions,
    pub reminders: ReminderOptions,
    pub messaging: MessagingOptions,
}

impl SiloConfig {
    /// Set the silo endpoint.
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.endpoint.host = host.into();
        self.endpoint.port = port;
        self
    }

    /// Set the silo's display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint.silo_name = Some(name.into());
        self
    }

    /// Check values that would make the runtime misbehave.
    pub fn validate(&self) -> Result<(), String> {
        if self.cluster.cluster_id.trim().is_empty() {
            return Err("cluster.cluster_id must not be empty".into());
        }
        if self.cluster.service_id.trim().is_empty() {
            return Err("cluster.service_id must not be empty".into());
        }
        if self.membership.num_votes_for_death == 0 {
            return Err("membership.num_votes_for_death must be at least 1".into());
        }
        if self.membership.num_missed_probes_limit == 0 {
            return Err("membership.num_missed_probes_limit must be at least 1".into());
        }
        let periods = [
            ("membership.i_am_alive_period_ms", self.membership.i_am_alive_period),
            ("membership.probe_period_ms", self.membership.probe_period),
            ("collection.collection_quantum_ms", self.collection.collection_quantum),
            ("reminders.refresh_period_ms", self.reminders.refresh_period),
            ("messaging.response_timeout_ms", self.messaging.response_timeout),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }
}

/// Cluster identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Silos only see peers with the same cluster id.
    pub cluster_id: String,
    /// Stable across redeployments of the same service.
    pub service_id: String,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            cluster_id: "dev".to_string(),
            service_id: "silo".to_string(),
        }
    }
}

/// Where this silo listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silo_name: Option<String>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11111,
            silo_name: None,
        }
    }
}

/// Failure detection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipOptions {
    #[serde(rename = "i_am_alive_period_ms", with = "duration_ms")]
    pub i_am_alive_period: Duration,
    #[serde(rename = "probe_period_ms", with = "duration_ms")]
    pub probe_period: Duration,
    #[serde(rename = "probe_timeout_ms", with = "duration_ms")]
    pub probe_timeout: Duration,
    /// Consecutive failed probes before a peer is suspected.
    pub num_missed_probes_limit: u32,
    /// Distinct votes needed to declare a peer dead.
    pub num_votes_for_death: usize,
    /// Votes older than this are ignored. Heartbeats older than this also
    /// make a peer suspect.
    #[serde(rename = "death_vote_expiration_ms", with = "duration_ms")]
    pub death_vote_expiration: Duration,
    /// How long dead rows stay in the table.
    #[serde(rename = "defunct_silo_cleanup_ms", with = "duration_ms")]
    pub defunct_silo_cleanup: Duration,
}

impl Default for MembershipOptions {
    fn default() -> Self {
        Self {
            i_am_alive_period: Duration::from_secs(5),
            probe_period: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(1),
            num_missed_probes_limit: 3,
            num_votes_for_death: 2,
            death_vote_expiration: Duration::from_secs(120),
            defunct_silo_cleanup: Duration::from_secs(3600),
        }
    }
}

/// Idle activation collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionOptions {
    #[serde(rename = "collection_quantum_ms", with = "duration_ms")]
    pub collection_quantum: Duration,
    #[serde(rename = "collection_age_ms", with = "duration_ms")]
    pub collection_age: Duration,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            collection_quantum: Duration::from_secs(60),
            collection_age: Duration::from_secs(15 * 60),
        }
    }
}

/// Reminder service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderOptions {
    #[serde(rename = "refresh_period_ms", with = "duration_ms")]
    pub refresh_period: Duration,
    #[serde(rename = "minimum_reminder_period_ms", with = "duration_ms")]
    pub minimum_reminder_period: Duration,
}

impl Default for ReminderOptions {
    fn default() -> Self {
        Self {
            refresh_period: Duration::from_secs(30),
            minimum_reminder_period: Duration::from_secs(60),
        }
    }
}

/// Grain call settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingOptions {
    #[serde(rename = "response_timeout_ms", with = "duration_ms")]
    pub response_timeout: Duration,
}

impl Default for MessagingOptions {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
        }
    }
}

/// Serialize a `Duration` as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_sections_keep_defaults() {
        let config: SiloConfig = serde_json::from_value(serde_json::json!({
            "cluster": { "cluster_id": "prod" },
            "membership": { "probe_period_ms": 250 }
        }))
        .expect("valid config");

        assert_eq!(config.cluster.cluster_id, "prod");
        assert_eq!(config.cluster.service_id, "silo");
        assert_eq!(config.membership.probe_period, Duration::from_millis(250));
        assert_eq!(config.membership.num_votes_for_death, 2);
        assert_eq!(config.messaging.response_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_periods_and_votes() {
        let mut config = SiloConfig::default();
        config.membership.num_votes_for_death = 0;
        assert!(config.validate().is_err());

        let mut config = SiloConfig::default();
        config.reminders.refresh_period = Duration::ZERO;
        let err = config.validate().expect_err("zero refresh period");
        assert!(err.contains("refresh_period_ms"));
    }
}
