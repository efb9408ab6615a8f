use serde::{Deserialize, Deserializer};

/// A numeric field from the Stats API.
///
/// The API returns either a scalar or a time-series array per field; the last
/// array element is the most recent sample. This shape is absorbed here so
/// the domain types only ever see plain numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatValue {
    Series(Vec<f64>),
    Scalar(f64),
}

impl StatValue {
    fn last(self) -> Option<f64> {
        match self {
            StatValue::Series(values) => values.last().copied(),
            StatValue::Scalar(value) => Some(value),
        }
    }
}

fn last_count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<StatValue>::deserialize(deserializer)?;
    Ok(value.and_then(StatValue::last).map(|v| v as i64).unwrap_or(0))
}

fn last_size<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<StatValue>::deserialize(deserializer)?;
    Ok(value.and_then(StatValue::last))
}

/// Statistics for a single queue over the requested period.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    #[serde(default, deserialize_with = "last_count")]
    pub messages_in_queue: i64,

    #[serde(default, deserialize_with = "last_count")]
    pub messages_in_flight: i64,

    #[serde(default, deserialize_with = "last_count")]
    pub messages_sent: i64,

    #[serde(default, deserialize_with = "last_count")]
    pub messages_received: i64,

    #[serde(default, deserialize_with = "last_count")]
    pub messages_acked: i64,

    /// Queue size in bytes, when the upstream reports one.
    #[serde(default, deserialize_with = "last_size")]
    pub queue_size: Option<f64>,

    #[serde(default, deserialize_with = "last_size")]
    pub average_message_size: Option<f64>,
}

impl QueueStats {
    /// Messages waiting plus messages currently being processed.
    pub fn total_messages(&self) -> i64 {
        self.messages_in_queue + self.messages_in_flight
    }
}

/// Statistics for a single exchange over the requested period.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeStats {
    #[serde(default, deserialize_with = "last_count")]
    pub messages_published: i64,

    #[serde(default, deserialize_with = "last_count")]
    pub messages_delivered: i64,
}

/// One record from the destinations listing.
///
/// The endpoint serves queues and exchanges interleaved; which identifier
/// field is present depends on the `type` attribute.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRecord {
    #[serde(default)]
    pub queue_id: Option<String>,

    #[serde(default)]
    pub queue_name: Option<String>,

    #[serde(default)]
    pub exchange_id: Option<String>,

    #[serde(default)]
    pub exchange_name: Option<String>,

    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub fifo: Option<bool>,

    #[serde(default)]
    pub default_ttl: Option<i64>,

    #[serde(default)]
    pub default_lock_ttl: Option<i64>,

    #[serde(default)]
    pub max_deliveries: Option<i64>,

    #[serde(default)]
    pub default_dead_letter_queue_id: Option<String>,

    #[serde(default)]
    pub encrypted: Option<bool>,
}

impl DestinationRecord {
    fn is_exchange(&self) -> bool {
        self.kind
            .as_deref()
            .map(|kind| kind.eq_ignore_ascii_case("exchange"))
            .unwrap_or(false)
    }

    /// Converts a wire record into a domain destination, tagging it with the
    /// environment and region it was listed under. Records without a usable
    /// identifier are dropped.
    pub fn into_destination(self, environment_id: &str, region: &str) -> Option<Destination> {
        if self.is_exchange() {
            let id = self.exchange_id?;
            Some(Destination::Exchange(ExchangeAttributes {
                name: self.exchange_name,
                encrypted: self.encrypted.unwrap_or(false),
                environment_id: environment_id.to_owned(),
                region: region.to_owned(),
                id,
            }))
        } else {
            let id = self.queue_id?;
            Some(Destination::Queue(QueueAttributes {
                name: self.queue_name,
                fifo: self.fifo.unwrap_or(false),
                default_ttl: self.default_ttl,
                default_lock_ttl: self.default_lock_ttl,
                max_deliveries: self.max_deliveries,
                dead_letter_queue_id: self.default_dead_letter_queue_id,
                encrypted: self.encrypted.unwrap_or(false),
                environment_id: environment_id.to_owned(),
                region: region.to_owned(),
                id,
            }))
        }
    }
}

/// A destination in Anypoint MQ: either a point-to-point queue or a fan-out
/// exchange. The variant decides which stats endpoint is valid for it.
#[derive(Clone, Debug)]
pub enum Destination {
    Queue(QueueAttributes),
    Exchange(ExchangeAttributes),
}

#[derive(Clone, Debug)]
pub struct QueueAttributes {
    pub id: String,
    pub name: Option<String>,
    pub fifo: bool,
    pub default_ttl: Option<i64>,
    pub default_lock_ttl: Option<i64>,
    pub max_deliveries: Option<i64>,
    pub dead_letter_queue_id: Option<String>,
    pub encrypted: bool,
    pub environment_id: String,
    pub region: String,
}

impl QueueAttributes {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }

    /// Queue name with every character outside `[A-Za-z0-9_-]` replaced by
    /// `_`, for use as a metric label value.
    pub fn sanitized_name(&self) -> String {
        sanitize_label(self.display_name())
    }

    /// Name-based dead letter queue detection. The upstream's
    /// `defaultDeadLetterQueueId` pointer names the DLQ of *another* queue
    /// and is intentionally not consulted here.
    pub fn is_dead_letter_queue(&self) -> bool {
        let name = self.sanitized_name().to_lowercase();
        name.contains("dlq")
            || name.contains("dead-letter")
            || name.contains("deadletter")
            || name.ends_with("-dead")
            || name.ends_with("-dl")
    }

    pub fn has_dead_letter_queue(&self) -> bool {
        self.dead_letter_queue_id
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct ExchangeAttributes {
    pub id: String,
    pub name: Option<String>,
    pub encrypted: bool,
    pub environment_id: String,
    pub region: String,
}

impl ExchangeAttributes {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }

    pub fn sanitized_name(&self) -> String {
        sanitize_label(self.display_name())
    }
}

pub fn sanitize_label(name: &str) -> String {
    if name.is_empty() {
        return "unknown".to_owned();
    }
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Response of `/accounts/api/me`, reduced to the organization membership
/// needed for discovery.
#[derive(Debug, Deserialize)]
pub struct MeResponse {
    pub user: Option<MeUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeUser {
    pub organization: Option<UserOrganization>,

    #[serde(default)]
    pub member_of_organizations: Vec<OrganizationSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOrganization {
    pub id: String,
    pub name: Option<String>,

    #[serde(default)]
    pub sub_organization_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrganizationSummary {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnvironmentsResponse {
    #[serde(default)]
    pub data: Vec<EnvironmentData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentData {
    pub id: String,
    pub name: String,

    #[serde(rename = "type", default)]
    pub environment_type: Option<String>,

    #[serde(default)]
    pub is_production: bool,
}
