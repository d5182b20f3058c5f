// tests/common/mod.rs
// Shared fixtures: tempfile-backed application state with scripted clients.

#![allow(dead_code)]

use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use querydeck_backend::agents::{Agent, CreateAgentRequest};
use querydeck_backend::auth::{RegisterRequest, User};
use querydeck_backend::config::{
    BrokerConfig, CacheConfig, Config, DatabaseConfig, EmbeddingConfig, HistoryConfig, LlmConfig,
    QdrantConfig, ServerConfig, WorkerConfig,
};
use querydeck_backend::connections::{Connection, CreateConnectionRequest};
use querydeck_backend::embedding::EmbeddingClient;
use querydeck_backend::llm::ModelClient;
use querydeck_backend::state::AppState;
use querydeck_backend::testing::{FixedEmbedder, ScriptedModel};

pub struct TestEnv {
    pub state: Arc<AppState>,
    pub model: Arc<ScriptedModel>,
    /// Holds the metadata DB and dataset files for the test's lifetime.
    pub dir: TempDir,
}

pub fn test_config(dir: &TempDir) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 8,
            broker_url: String::new(),
            result_backend_url: String::new(),
            datasets_dir: dir.path().join("datasets").to_string_lossy().into_owned(),
        },
        worker: WorkerConfig {
            worker_count: 1,
            concurrency: 1,
            run_timeout_secs: 30,
            visibility_grace_secs: 5,
            poll_interval_ms: 50,
        },
        broker: BrokerConfig {
            max_retries: 3,
            max_depth: 100,
        },
        cache: CacheConfig {
            enabled: true,
            ttl_seconds: 3600,
            max_entries: 1000,
        },
        history: HistoryConfig::default(),
        llm: LlmConfig {
            api_key: String::new(),
            base_url: "http://localhost:1".to_string(),
            judge_model: "judge-model".to_string(),
            request_timeout_secs: 5,
        },
        embedding: EmbeddingConfig {
            model: "fixed-test-embedder".to_string(),
            dimensions: 1536,
            poll_interval_secs: 3600,
            max_attempts: 3,
        },
        qdrant: QdrantConfig {
            url: None,
            collection: "test_messages".to_string(),
        },
    }
}

async fn test_pool(dir: &TempDir) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("meta.db"))
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(30));
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .expect("test pool");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    pool
}

/// Build a full application state over a tempfile database, with a scripted
/// model and a configurable embedder. `mutate` tweaks the config first.
pub async fn build_env(
    mutate: impl FnOnce(&mut Config),
    embedder: Arc<dyn EmbeddingClient>,
) -> TestEnv {
    let dir = TempDir::new().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("datasets")).expect("datasets dir");

    let mut config = test_config(&dir);
    mutate(&mut config);

    let pool = test_pool(&dir).await;
    let model = Arc::new(ScriptedModel::default());
    let state = AppState::with_clients(
        pool,
        config,
        model.clone() as Arc<dyn ModelClient>,
        embedder,
    )
    .await
    .expect("app state");

    TestEnv {
        state: Arc::new(state),
        model,
        dir,
    }
}

pub async fn env() -> TestEnv {
    build_env(|_| {}, Arc::new(FixedEmbedder::default())).await
}

pub async fn register_user(env: &TestEnv, email: &str) -> User {
    env.state
        .auth
        .register(RegisterRequest {
            email: email.to_string(),
            password: "password123".to_string(),
            display_name: None,
        })
        .await
        .expect("register")
        .user
}

/// Create an embedded dataset with an `orders` table (3 rows) and a `secrets`
/// decoy table.
pub async fn seed_orders_dataset(env: &TestEnv, dataset_id: &str) {
    let path = env
        .dir
        .path()
        .join("datasets")
        .join(format!("{dataset_id}.db"));
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await.expect("dataset pool");

    sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT, amount REAL)")
        .execute(&pool)
        .await
        .expect("create orders");
    for (customer, amount) in [("acme", 10.0), ("globex", 20.5), ("initech", 30.25)] {
        sqlx::query("INSERT INTO orders (customer, amount) VALUES (?, ?)")
            .bind(customer)
            .bind(amount)
            .execute(&pool)
            .await
            .expect("insert order");
    }

    sqlx::query("CREATE TABLE secrets (id INTEGER PRIMARY KEY, token TEXT)")
        .execute(&pool)
        .await
        .expect("create secrets");

    pool.close().await;
}

pub async fn sqlite_connection(env: &TestEnv, user: &User, dataset_id: &str) -> Connection {
    env.state
        .connections
        .create(
            &user.id,
            CreateConnectionRequest {
                kind: "sqlite".to_string(),
                payload: json!({ "dataset_id": dataset_id }),
            },
        )
        .await
        .expect("connection")
}

pub fn agent_request(connection_id: &str) -> CreateAgentRequest {
    CreateAgentRequest {
        name: "orders agent".to_string(),
        connection_id: connection_id.to_string(),
        model_id: "gpt-4o-mini".to_string(),
        top_k: 10,
        included_tables: "*".to_string(),
        advanced: false,
        processing_enabled: false,
        refinement_enabled: false,
        single_table_mode: false,
        selected_table: None,
    }
}

pub async fn seed_agent(env: &TestEnv, user: &User, connection_id: &str) -> Agent {
    env.state
        .agents
        .create(&user.id, agent_request(connection_id))
        .await
        .expect("agent")
}

/// User + dataset + connection + agent in one go.
pub async fn seed_stack(env: &TestEnv, email: &str) -> (User, Connection, Agent) {
    let user = register_user(env, email).await;
    seed_orders_dataset(env, "sales").await;
    let connection = sqlite_connection(env, &user, "sales").await;
    let agent = seed_agent(env, &user, &connection.id).await;
    (user, connection, agent)
}

/// Standard scripted exchange: one SQL generation reply plus one narration.
pub fn queue_count_exchange(env: &TestEnv) {
    env.model.push_reply(
        "Counting the orders:\n```sql\nSELECT COUNT(*) AS order_count FROM orders\n```",
    );
    env.model.push_reply("There are 3 orders in total.");
}
