//! Externally reachable webhook URLs handed to connectors.

#[derive(Debug, Clone)]
pub struct WebhookUrlResolver {
    base: String,
}

impl WebhookUrlResolver {
    pub fn new(public_url: impl Into<String>) -> Self {
        let base = public_url.into().trim_end_matches('/').to_string();
        Self { base }
    }

    /// `{public_url}/v1/webhooks/{flow_id}`, with `/simulate` for builder test runs.
    pub fn resolve(&self, flow_id: &str, simulate: bool) -> String {
        if simulate {
            format!("{}/v1/webhooks/{flow_id}/simulate", self.base)
        } else {
            format!("{}/v1/webhooks/{flow_id}", self.base)
        }
    }
}
