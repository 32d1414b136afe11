use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use conduit_core::config::{ChannelConfig, ChannelMode};
use conduit_core::domain::agent::{AgentDefinition, AgentId, AgentPatch, AgentRecord};

use super::{truncate_body, AgentChannel, ChannelError};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const CREATED_ID_PATHS: [&str; 6] =
    ["data.id", "id", "data.agentId", "agentId", "data.agent.id", "agent.id"];

/// HTTP client for an agent runtime that runs as a separate process.
#[derive(Clone, Debug)]
pub struct RemoteRuntimeClient {
    base_url: String,
    client: Client,
}

impl RemoteRuntimeClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ChannelError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    pub fn from_config(config: &ChannelConfig) -> Result<Self, ChannelError> {
        Self::new(config.api_base_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_json(response: Response) -> Result<Value, ChannelError> {
        let body = ensure_success(response).await?.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|error| ChannelError::Decode(error.to_string()))
    }
}

#[async_trait]
impl AgentChannel for RemoteRuntimeClient {
    fn mode(&self) -> ChannelMode {
        ChannelMode::Process
    }

    async fn create_agent(&self, definition: &AgentDefinition) -> Result<AgentId, ChannelError> {
        let response = self
            .client
            .post(self.url("/agent/start"))
            .json(&json!({ "characterJson": definition }))
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let raw_id = CREATED_ID_PATHS
            .iter()
            .find_map(|path| lookup_str(&body, path))
            .ok_or_else(|| ChannelError::Decode(format!("no agent id in start response: {body}")))?;
        let id = AgentId::parse(raw_id).map_err(|error| ChannelError::Decode(error.to_string()))?;
        debug!(event_name = "channel.remote.agent_started", agent_id = %id, "runtime accepted agent");
        Ok(id)
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<AgentRecord>, ChannelError> {
        let response = self.client.get(self.url(&format!("/agents/{id}"))).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::read_json(response).await?;
        let payload = unwrap_envelope(&body);
        let agent = payload.get("agent").unwrap_or(payload);

        decode_agent(agent)
            .map(Some)
            .ok_or_else(|| ChannelError::Decode(format!("unrecognized agent payload for `{id}`")))
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>, ChannelError> {
        let response = self.client.get(self.url("/agents")).send().await?;
        let body = Self::read_json(response).await?;
        let payload = unwrap_envelope(&body);
        let items = payload
            .get("agents")
            .and_then(Value::as_array)
            .or_else(|| payload.as_array())
            .ok_or_else(|| ChannelError::Decode("agent listing is not a list".to_string()))?;

        Ok(items.iter().filter_map(decode_agent).collect())
    }

    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<(), ChannelError> {
        let response =
            self.client.patch(self.url(&format!("/agents/{id}"))).json(patch).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<(), ChannelError> {
        let response = self.client.delete(self.url(&format!("/agents/{id}"))).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        id: &AgentId,
        text: &str,
        user_id: &str,
    ) -> Result<Value, ChannelError> {
        let response = self
            .client
            .post(self.url(&format!("/{id}/message")))
            .form(&[("text", text), ("user", user_id)])
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;

        // Some runtimes answer with plain text instead of JSON.
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    async fn message_history(
        &self,
        id: &AgentId,
        user_id: &str,
    ) -> Result<Option<Vec<Value>>, ChannelError> {
        let response = self
            .client
            .get(self.url(&format!("/agents/{id}/messages")))
            .query(&[("userId", user_id)])
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        let payload = unwrap_envelope(&body);
        let entries = payload
            .get("messages")
            .and_then(Value::as_array)
            .or_else(|| payload.as_array())
            .cloned()
            .ok_or_else(|| ChannelError::Decode("message history is not a list".to_string()))?;

        Ok(Some(entries))
    }

    async fn is_available(&self) -> bool {
        match self.client.get(self.url("/agents")).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                debug!(error = %error, "runtime api probe failed");
                false
            }
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChannelError::Status { status: status.as_u16(), body: truncate_body(body) })
}

fn unwrap_envelope(body: &Value) -> &Value {
    match body.get("data") {
        Some(data) if !data.is_null() => data,
        _ => body,
    }
}

fn lookup_str<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    let mut current = value;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    current.as_str().filter(|raw| !raw.trim().is_empty())
}

/// Maps one agent object from the runtime's API onto the canonical record.
///
/// Runtimes nest the definition under `character` in some versions, so the
/// lookups fall through from the top level to that object.
pub(crate) fn decode_agent(value: &Value) -> Option<AgentRecord> {
    let character = value.get("character").filter(|inner| inner.is_object());
    let field = |key: &str| {
        value.get(key).filter(|inner| !inner.is_null()).or_else(|| character?.get(key))
    };

    let id = field("id")
        .or_else(|| field("agentId"))
        .and_then(Value::as_str)
        .and_then(|raw| AgentId::parse(raw).ok())?;
    let name = field("name").and_then(Value::as_str).unwrap_or_default().to_string();
    let description = match field("description").and_then(Value::as_str) {
        Some(description) if !description.trim().is_empty() => description.to_string(),
        _ => match field("bio") {
            Some(Value::String(bio)) => bio.clone(),
            Some(Value::Array(lines)) => {
                lines.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(" ")
            }
            _ => String::new(),
        },
    };
    let system_prompt = field("system").and_then(Value::as_str).unwrap_or_default().to_string();

    let now = Utc::now();
    let created_at = field("createdAt").and_then(parse_remote_timestamp).unwrap_or(now);
    let updated_at = field("updatedAt").and_then(parse_remote_timestamp).unwrap_or(created_at);

    Some(AgentRecord {
        id,
        name,
        description,
        system_prompt,
        metadata: character.cloned().unwrap_or_else(|| value.clone()),
        created_at,
        updated_at,
    })
}

/// Accepts RFC 3339 strings or epoch milliseconds.
pub(crate) fn parse_remote_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            DateTime::parse_from_rfc3339(raw).ok().map(|parsed| parsed.with_timezone(&Utc))
        }
        Value::Number(number) => Utc.timestamp_millis_opt(number.as_i64()?).single(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_json, body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use conduit_core::domain::agent::{AgentDefinition, AgentId, AgentPatch};

    use super::{decode_agent, parse_remote_timestamp, RemoteRuntimeClient};
    use crate::channel::{AgentChannel, ChannelError};

    fn client(server: &MockServer) -> RemoteRuntimeClient {
        RemoteRuntimeClient::new(server.uri(), Duration::from_secs(5)).expect("client builds")
    }

    #[tokio::test]
    async fn create_agent_posts_character_json_and_reads_enveloped_id() {
        let server = MockServer::start().await;
        let definition = AgentDefinition { name: "Bot1".to_string(), ..AgentDefinition::default() };
        Mock::given(method("POST"))
            .and(path("/agent/start"))
            .and(body_json(json!({ "characterJson": definition })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": "agent-9" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).create_agent(&definition).await.expect("agent created");

        assert_eq!(id, AgentId("agent-9".to_string()));
    }

    #[tokio::test]
    async fn create_agent_without_id_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;

        let result = client(&server).create_agent(&AgentDefinition::default()).await;

        assert!(matches!(result, Err(ChannelError::Decode(_))));
    }

    #[tokio::test]
    async fn list_agents_accepts_data_envelope_and_nested_character() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "agents": [
                    { "id": "a-1", "name": "One", "bio": ["Likes", "charts"] },
                    { "character": { "id": "a-2", "name": "Two", "system": "Be brief." } },
                    { "name": "no id, skipped" }
                ] }
            })))
            .mount(&server)
            .await;

        let agents = client(&server).list_agents().await.expect("listing succeeds");

        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].description, "Likes charts");
        assert_eq!(agents[1].id.as_str(), "a-2");
        assert_eq!(agents[1].system_prompt, "Be brief.");
    }

    #[tokio::test]
    async fn get_agent_maps_not_found_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let found = client(&server)
            .get_agent(&AgentId("ghost".to_string()))
            .await
            .expect("404 is not an error");

        assert!(found.is_none());
    }

    #[tokio::test]
    async fn send_message_posts_form_fields_and_returns_raw_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a-1/message"))
            .and(body_string_contains("text=hello"))
            .and(body_string_contains("user=user-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "text": "hi there" }])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let payload = client(&server)
            .send_message(&AgentId("a-1".to_string()), "hello", "user-1")
            .await
            .expect("message delivered");

        assert_eq!(payload, json!([{ "text": "hi there" }]));
    }

    #[tokio::test]
    async fn send_message_keeps_plain_text_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a-1/message"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain reply"))
            .mount(&server)
            .await;

        let payload = client(&server)
            .send_message(&AgentId("a-1".to_string()), "hello", "user-1")
            .await
            .expect("message delivered");

        assert_eq!(payload, json!("plain reply"));
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/agents/a-1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("exploded"))
            .mount(&server)
            .await;

        let result = client(&server)
            .update_agent(&AgentId("a-1".to_string()), &AgentPatch::default())
            .await;

        assert!(matches!(
            result,
            Err(ChannelError::Status { status: 500, ref body }) if body == "exploded"
        ));
    }

    #[tokio::test]
    async fn delete_treats_missing_agent_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/agents/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        client(&server)
            .delete_agent(&AgentId("gone".to_string()))
            .await
            .expect("missing agent delete is idempotent");
    }

    #[tokio::test]
    async fn history_passes_user_id_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents/a-1/messages"))
            .and(query_param("userId", "user-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "messages": [{ "text": "earlier" }] }
            })))
            .mount(&server)
            .await;

        let history = client(&server)
            .message_history(&AgentId("a-1".to_string()), "user-1")
            .await
            .expect("history fetched");

        assert_eq!(history, Some(vec![json!({ "text": "earlier" })]));
    }

    #[tokio::test]
    async fn availability_reflects_probe_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        assert!(client(&server).is_available().await);

        let unreachable = RemoteRuntimeClient::new("http://127.0.0.1:9", Duration::from_secs(1))
            .expect("client builds");
        assert!(!unreachable.is_available().await);
    }

    #[test]
    fn decode_agent_reads_timestamps_in_either_format() {
        let record = decode_agent(&json!({
            "id": "a-1",
            "name": "One",
            "createdAt": 1_700_000_000_000_i64,
            "updatedAt": "2024-01-02T03:04:05Z"
        }))
        .expect("decodes");

        assert_eq!(record.created_at.timestamp(), 1_700_000_000);
        assert_eq!(record.updated_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert!(parse_remote_timestamp(&json!(true)).is_none());
    }
}
