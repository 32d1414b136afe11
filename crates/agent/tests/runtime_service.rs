use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use conduit_agent::{AgentSource, ReplySource, RuntimeService};
use conduit_core::config::{AppConfig, ChannelMode};
use conduit_core::domain::agent::{AgentId, AgentOverrides};
use conduit_db::{connect_with_settings, migrations, DbPool};

async fn pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    pool
}

fn config(runtime_url: &str, completion_url: &str, templates: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.channel.mode = ChannelMode::Process;
    config.channel.api_base_url = runtime_url.to_string();
    config.channel.request_timeout_secs = 5;
    config.completion.base_url = completion_url.to_string();
    config.completion.api_key = Some("sk-process".to_string().into());
    config.templates.dir = templates.to_path_buf();
    config
}

#[tokio::test]
async fn process_mode_creates_agent_from_template_and_routes_messages() {
    let runtime = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agent/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": "agent-1" } })))
        .mount(&runtime)
        .await;
    Mock::given(method("POST"))
        .and(path("/agent-1/message"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "user": "Trader", "text": "Markets are up." }])),
        )
        .expect(1)
        .mount(&runtime)
        .await;
    let templates = tempfile::tempdir().expect("temp dir");
    std::fs::write(
        templates.path().join("trader.json"),
        r#"{ "name": "Trader", "bio": ["Reads charts."], "style": { "all": null } }"#,
    )
    .expect("write template");
    let config = config(&runtime.uri(), "http://127.0.0.1:9", templates.path());
    let service = RuntimeService::from_config(&config, pool().await).expect("service builds");

    let agent = service
        .create_agent(AgentSource::Template("trader".to_string()), AgentOverrides::named("Bot1"))
        .await
        .expect("agent created");
    let first = service.route_message(&agent.id, "How are markets?", "user-1").await;
    let second = service.route_message(&agent.id, "How are markets?", "user-2").await;

    assert_eq!(agent.id, AgentId("agent-1".to_string()));
    assert_eq!(agent.name, "Bot1");
    assert_eq!(first.text, "Markets are up.");
    assert_eq!(first.source, ReplySource::Channel);
    assert_eq!(second.source, ReplySource::Cache);
    let stored = service.get_agent(&agent.id).await.expect("stored agent");
    assert_eq!(stored.description, "Reads charts.");
}

#[tokio::test]
async fn unreachable_runtime_degrades_to_completion_then_apology() {
    let completion = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "From the fallback." } }]
        })))
        .mount(&completion)
        .await;
    let templates = tempfile::tempdir().expect("temp dir");
    let reachable = config("http://127.0.0.1:9", &completion.uri(), templates.path());
    let service = RuntimeService::from_config(&reachable, pool().await).expect("service builds");
    let agent_id = AgentId("ghost".to_string());

    let reply = service.route_message(&agent_id, "hello", "user-1").await;

    assert_eq!(reply.source, ReplySource::Completion);
    assert_eq!(reply.text, "From the fallback.");

    let broken = config("http://127.0.0.1:9", "http://127.0.0.1:9", templates.path());
    let service = RuntimeService::from_config(&broken, pool().await).expect("service builds");

    let apology = service.send_message(&agent_id, "hello", "user-1").await;

    assert!(apology.contains("error:"));
    assert_eq!(service.cache_len().await, 0);
    assert!(service.list_agents().await.is_empty());
}

#[tokio::test]
async fn template_fields_outside_the_core_shape_reach_the_runtime() {
    let runtime = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agent/start"))
        .and(body_partial_json(json!({
            "characterJson": {
                "name": "Bot1",
                "bio": ["One line bio."],
                "username": "defi_bot",
                "topics": ["defi"],
                "adjectives": ["calm"],
                "messageExamples": [],
                "clients": ["direct"]
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "agent-7" })))
        .expect(1)
        .mount(&runtime)
        .await;
    let templates = tempfile::tempdir().expect("temp dir");
    std::fs::write(
        templates.path().join("defi.json"),
        r#"{
            "name": "Defi",
            "bio": "One line bio.",
            "username": "defi_bot",
            "topics": ["defi"],
            "adjectives": ["calm"],
            "messageExamples": [],
            "clients": ["direct"]
        }"#,
    )
    .expect("write template");
    let config = config(&runtime.uri(), "http://127.0.0.1:9", templates.path());
    let service = RuntimeService::from_config(&config, pool().await).expect("service builds");

    let agent = service
        .create_agent(AgentSource::Template("defi".to_string()), AgentOverrides::named("Bot1"))
        .await
        .expect("agent created");

    assert_eq!(agent.id, AgentId("agent-7".to_string()));
    assert_eq!(agent.metadata["topics"], json!(["defi"]));
    assert_eq!(agent.metadata["clients"], json!(["direct"]));
}

#[tokio::test]
async fn runtime_error_without_credentials_yields_an_apology() {
    let runtime = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agent-1/message"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&runtime)
        .await;
    let templates = tempfile::tempdir().expect("temp dir");
    let mut config = config(&runtime.uri(), "http://127.0.0.1:9", templates.path());
    config.completion.api_key = None;
    let service = RuntimeService::from_config(&config, pool().await).expect("service builds");

    let reply = service.route_message(&AgentId("agent-1".to_string()), "hi", "user-1").await;

    assert_eq!(reply.source, ReplySource::Apology);
    assert!(reply.text.contains("error:"));
    assert!(!reply.text.is_empty());
    assert_eq!(service.cache_len().await, 0);
}

#[tokio::test]
async fn deleting_twice_keeps_the_agent_out_of_listings() {
    let runtime = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agent/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": "agent-1" } })))
        .mount(&runtime)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/agents/agent-1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&runtime)
        .await;
    Mock::given(method("GET"))
        .and(path("/agents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "agents": [{ "id": "agent-1", "name": "Bot1" }]
        })))
        .mount(&runtime)
        .await;
    let templates = tempfile::tempdir().expect("temp dir");
    let config = config(&runtime.uri(), "http://127.0.0.1:9", templates.path());
    let service = RuntimeService::from_config(&config, pool().await).expect("service builds");
    let agent = service
        .create_agent(
            AgentSource::Custom(conduit_core::domain::agent::AgentDefinition {
                name: "Bot1".to_string(),
                ..Default::default()
            }),
            AgentOverrides::default(),
        )
        .await
        .expect("agent created");

    let first = service.delete_agent(&agent.id).await;
    let second = service.delete_agent(&agent.id).await;

    assert!(!first.channel_deleted);
    assert!(first.store_deleted);
    assert!(!second.store_deleted);
    assert!(service.list_agents().await.is_empty());
    assert!(service.get_agent(&agent.id).await.is_err());
}
