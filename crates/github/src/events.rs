use serde::Deserialize;

pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// The subset of GitHub webhook events this service cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Ping(PingEvent),
    Push(PushEvent),
    Other { kind: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PingEvent {
    pub zen: Option<String>,
    pub hook_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// `owner/name` of the repository.
    pub repository: String,
    /// Fully qualified ref, e.g. `refs/heads/main`.
    pub git_ref: String,
    /// `None` when the ref was deleted.
    pub head_commit: Option<String>,
}

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    repository: RepositoryPayload,
    head_commit: Option<CommitPayload>,
}

#[derive(Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

#[derive(Deserialize)]
struct CommitPayload {
    id: String,
}

impl WebhookEvent {
    /// Parse a verified payload according to the `X-GitHub-Event` value.
    ///
    /// Pings are acknowledged even when their body can't be read, every other
    /// event type must at least be valid JSON.
    pub fn parse(kind: &str, payload: &[u8]) -> serde_json::Result<Self> {
        match kind {
            "ping" => Ok(Self::Ping(serde_json::from_slice(payload).unwrap_or_default())),
            "push" => {
                let push: PushPayload = serde_json::from_slice(payload)?;
                Ok(Self::Push(PushEvent {
                    repository: push.repository.full_name,
                    git_ref: push.git_ref,
                    head_commit: push.head_commit.map(|c| c.id),
                }))
            }
            _ => {
                serde_json::from_slice::<serde::de::IgnoredAny>(payload)?;
                Ok(Self::Other { kind: kind.to_string() })
            }
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Ping(_) => "ping",
            Self::Push(_) => "push",
            Self::Other { kind } => kind,
        }
    }
}

impl PushEvent {
    /// Whether this push should trigger a sync. Deleted refs never do.
    pub fn is_update(&self) -> bool { self.head_commit.is_some() }
}
