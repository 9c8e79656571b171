use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docrag::{
    AnswerGenerator, Document, GenerationRequest, HashEmbeddingProvider, LocalVectorStore, Page,
    Services, Settings, StoreConfig,
};
use docrag_server::{AppState, app_router, protocol::NO_RESULTS};
use serde_json::{Value, json};

const BILLING: &str = "Billing happens on the first day of every month and invoices are emailed.";
const SECURITY: &str = "Security keys rotate every ninety days and every access is audited.";

/// Records every request and answers with a fixed string.
#[derive(Default)]
struct FakeGenerator {
    requests: Mutex<Vec<GenerationRequest>>,
}

#[async_trait]
impl AnswerGenerator for FakeGenerator {
    fn name(&self) -> &str {
        "fake-llm"
    }

    async fn generate(&self, request: &GenerationRequest) -> docrag::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok("generated answer".to_string())
    }
}

async fn services(ingest: bool) -> Services {
    let settings = Settings { store: StoreConfig::Memory, ..Settings::default() };
    let services = Services::from_parts(
        settings,
        Arc::new(HashEmbeddingProvider::default()),
        Arc::new(LocalVectorStore::in_memory()),
    );
    if ingest {
        let handbook = Document::new(
            "handbook.txt",
            vec![Page::new(1, BILLING), Page::new(2, SECURITY)],
        );
        let pipeline = services.ingestion_pipeline().expect("pipeline");
        pipeline
            .ingest_document(&services.settings().collection, &handbook)
            .await
            .expect("ingest handbook");
    }
    services
}

async fn spawn_server(services: Services) -> (String, tokio::task::JoinHandle<()>) {
    let app = app_router(AppState::new(services));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    (format!("http://{}", addr), handle)
}

async fn post(base: &str, path: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .expect("post response");
    let status = response.status().as_u16();
    (status, response.json().await.expect("json body"))
}

#[tokio::test]
async fn health_and_index_are_served() {
    let (base, handle) = spawn_server(services(false).await).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .expect("health response")
        .json()
        .await
        .expect("health json");
    assert_eq!(health, json!({"status": "ok", "service": "docrag-server"}));

    let index = client.get(format!("{}/", base)).send().await.expect("index response");
    assert!(index.status().is_success());
    let html = index.text().await.expect("index body");
    assert!(html.contains("/api/ask"));
    assert!(html.contains("Temperature"));

    handle.abort();
}

#[tokio::test]
async fn retrieve_returns_ranked_sources_with_pages() {
    let (base, handle) = spawn_server(services(true).await).await;

    let (status, body) =
        post(&base, "/api/retrieve", json!({"question": "How are security keys rotated?"})).await;
    assert_eq!(status, 200);
    let results = body["results"].as_array().expect("results array");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["text"], SECURITY);
    assert_eq!(results[0]["page"], 2);
    assert_eq!(results[0]["document_id"], "handbook.txt");
    assert!(results[0]["distance"].as_f64() < results[1]["distance"].as_f64());

    let (_, body) = post(
        &base,
        "/api/retrieve",
        json!({"question": "How are security keys rotated?", "top_k": 1}),
    )
    .await;
    assert_eq!(body["results"].as_array().map(Vec::len), Some(1));

    handle.abort();
}

#[tokio::test]
async fn missing_or_blank_question_is_rejected() {
    let (base, handle) = spawn_server(services(true).await).await;

    for path in ["/api/ask", "/api/retrieve"] {
        let (status, body) = post(&base, path, json!({})).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "One or more fields have not been specified.");

        let (status, _) = post(&base, path, json!({"question": "   "})).await;
        assert_eq!(status, 400);
    }

    handle.abort();
}

#[tokio::test]
async fn retrieval_engine_answers_with_the_context() {
    let (base, handle) = spawn_server(services(true).await).await;

    let (status, body) =
        post(&base, "/api/ask", json!({"question": "When does billing happen?", "top_k": 1}))
            .await;
    assert_eq!(status, 200);
    assert_eq!(body["engine"], "retrieval");
    assert_eq!(body["answer"], format!("[1] handbook.txt (page 1)\n{BILLING}"));
    assert_eq!(body["sources"][0]["page"], 1);

    handle.abort();
}

#[tokio::test]
async fn generator_receives_default_sampling_parameters() {
    let generator = Arc::new(FakeGenerator::default());
    let services = services(true).await.with_generator(generator.clone());
    let (base, handle) = spawn_server(services).await;

    let engines: Value = reqwest::get(format!("{}/api/engines", base))
        .await
        .expect("engines response")
        .json()
        .await
        .expect("engines json");
    assert_eq!(engines["default"], "fake-llm");
    assert_eq!(engines["engines"], json!(["fake-llm", "retrieval"]));

    let (status, body) =
        post(&base, "/api/ask", json!({"question": "When does billing happen?"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], "generated answer");
    assert_eq!(body["engine"], "fake-llm");

    let (status, _) = post(
        &base,
        "/api/ask",
        json!({
            "question": "When does billing happen?",
            "engine": "fake-llm",
            "temperature": 0.2,
            "max_tokens": 256
        }),
    )
    .await;
    assert_eq!(status, 200);

    let requests = generator.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].question, "When does billing happen?");
    assert_eq!(requests[0].temperature, 1.0);
    assert_eq!(requests[0].max_tokens, 100);
    assert!(requests[0].context.starts_with("[1] handbook.txt (page 1)"));
    assert_eq!(requests[1].temperature, 0.2);
    assert_eq!(requests[1].max_tokens, 256);

    handle.abort();
}

#[tokio::test]
async fn invalid_engine_and_sampling_values_are_rejected() {
    let (base, handle) = spawn_server(services(true).await).await;

    let (status, body) =
        post(&base, "/api/ask", json!({"question": "billing", "engine": "gpt-9"})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Unknown engine 'gpt-9'.");

    let (status, _) =
        post(&base, "/api/ask", json!({"question": "billing", "temperature": 3.5})).await;
    assert_eq!(status, 400);

    let (status, _) =
        post(&base, "/api/ask", json!({"question": "billing", "max_tokens": 0})).await;
    assert_eq!(status, 400);

    handle.abort();
}

#[tokio::test]
async fn empty_collection_yields_no_results_answer() {
    let (base, handle) = spawn_server(services(false).await).await;

    let (status, body) = post(&base, "/api/ask", json!({"question": "anything at all"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], NO_RESULTS);
    assert_eq!(body["sources"], json!([]));

    let (status, body) = post(&base, "/api/retrieve", json!({"question": "anything"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["results"], json!([]));

    handle.abort();
}

#[cfg(feature = "openai")]
#[tokio::test]
async fn openai_compatible_generator_posts_chat_completions() {
    use axum::{Json, Router, routing::post as post_route};
    use docrag::{GeneratorConfig, OpenAICompatibleGenerator};

    let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
    let recorder = seen.clone();
    let fake_llm = Router::new().route(
        "/v1/chat/completions",
        post_route(move |Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(body);
                let message = json!({"role": "assistant", "content": " Monthly. "});
                Json(json!({"choices": [{"message": message}]}))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind fake llm");
    let llm_addr = listener.local_addr().expect("fake llm addr");
    let llm = tokio::spawn(async move {
        axum::serve(listener, fake_llm).await.expect("fake llm run");
    });

    let generator = OpenAICompatibleGenerator::new(GeneratorConfig {
        base_url: format!("http://{}/v1", llm_addr),
        model: "llama-2-13b-chat".to_string(),
        api_key: None,
    });
    let services = services(true).await.with_generator(Arc::new(generator));
    let (base, handle) = spawn_server(services).await;

    let (status, body) =
        post(&base, "/api/ask", json!({"question": "When does billing happen?"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], "Monthly.");
    assert_eq!(body["engine"], "llama-2-13b-chat");

    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["model"], "llama-2-13b-chat");
    assert_eq!(requests[0]["max_tokens"], 100);
    assert_eq!(requests[0]["temperature"], 1.0);
    let user = requests[0]["messages"][1]["content"].as_str().unwrap_or_default();
    assert!(user.contains("Question: When does billing happen?"));

    handle.abort();
    llm.abort();
}
