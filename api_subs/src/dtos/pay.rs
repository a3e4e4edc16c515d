use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}
