use serde::Deserialize;
use serde_json::Value;

/// A webhook delivery from Bling. Only `event` drives routing; the rest is
/// carried for logging.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default, rename = "companyId")]
    pub company_id: Option<Value>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Product,
    Order,
    Stock,
    Invoice,
    Other(String),
}

impl Resource {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "product" => Resource::Product,
            "order" => Resource::Order,
            "stock" => Resource::Stock,
            "invoice" => Resource::Invoice,
            other => Resource::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Resource::Product => "product",
            Resource::Order => "order",
            Resource::Stock => "stock",
            Resource::Invoice => "invoice",
            Resource::Other(tag) => tag,
        }
    }
}

/// `"resource.action"` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventName {
    pub resource: Resource,
    pub action: String,
}

impl EventName {
    pub fn parse(name: &str) -> Self {
        let (resource, action) = name.split_once('.').unwrap_or((name, ""));
        Self {
            resource: Resource::from_tag(resource),
            action: action.to_string(),
        }
    }
}

impl WebhookEvent {
    pub fn name(&self) -> Option<EventName> {
        self.event.as_deref().map(EventName::parse)
    }

    /// The identifier the resource is keyed by: stock events point at the
    /// product, everything else at `data.id`.
    pub fn subject_id(&self, resource: &Resource) -> Option<&Value> {
        match resource {
            Resource::Stock => self.data.get("produto").and_then(|p| p.get("id")),
            _ => self.data.get("id"),
        }
        .filter(|v| !v.is_null())
    }
}
