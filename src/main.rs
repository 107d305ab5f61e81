mod api;
mod config;
mod core;
mod infra;
mod logging;
mod models;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::admin::{health, list_tables, reset_data};
use crate::api::query::handle_query;
use crate::api::upload::upload_file;
use crate::config::AppConfig;
use crate::infra::llm::GeminiProvider;
use crate::infra::vector::QdrantStore;
use crate::models::schema::ToolCatalog;

pub mod ax_state {
    use std::sync::Arc;

    use crate::config::AppConfig;
    use crate::core::dispatcher::Dispatcher;
    use crate::core::formatter::ResponseFormatter;
    use crate::core::intent::IntentRouter;
    use crate::core::retrieval::DocumentIndex;
    use crate::core::session::SessionRegistry;
    use crate::infra::llm::LlmProvider;
    use crate::infra::store::TabularStore;
    use crate::infra::vector::VectorStore;
    use crate::models::schema::ToolCatalog;

    pub struct AppState {
        pub config: AppConfig,
        pub store: Arc<TabularStore>,
        pub documents: Arc<DocumentIndex>,
        pub router: IntentRouter,
        pub dispatcher: Dispatcher,
        pub formatter: ResponseFormatter,
        pub sessions: SessionRegistry,
    }

    impl AppState {
        pub fn new(
            config: AppConfig,
            llm: Arc<dyn LlmProvider>,
            vectors: Arc<dyn VectorStore>,
            catalog: ToolCatalog,
        ) -> Self {
            let store = Arc::new(TabularStore::new(config.data_db_path.clone()));
            let documents = Arc::new(DocumentIndex::new(llm.clone(), vectors, config.search_limit));
            Self {
                router: IntentRouter::new(llm.clone(), Arc::new(catalog)),
                dispatcher: Dispatcher::new(store.clone(), documents.clone()),
                formatter: ResponseFormatter::new(llm),
                sessions: SessionRegistry::new(),
                store,
                documents,
                config,
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    logging::init(&config.log_dir);

    if config.google_api_key.is_empty() {
        warn!("未设置 GOOGLE_API_KEY，LLM 调用将失败");
    }
    let catalog = ToolCatalog::load_or_builtin(&config.functions_path)?;
    info!("已加载 {} 个函数声明", catalog.functions.len());

    let llm = Arc::new(GeminiProvider::new(
        &config.gemini_base_url,
        config.google_api_key.clone(),
        config.gemini_model.clone(),
        config.embed_model.clone(),
    ));
    let vectors = Arc::new(QdrantStore::new(
        &config.qdrant_url,
        config.qdrant_api_key.clone(),
        config.qdrant_collection.clone(),
        config.qdrant_timeout,
    )?);

    let state = Arc::new(ax_state::AppState::new(config.clone(), llm, vectors, catalog));

    // 向量库不可用时服务照常启动
    match state.documents.ensure_ready(config.embed_dim).await {
        Ok(()) => info!("向量集合就绪"),
        Err(e) => warn!("向量集合初始化失败: {}", e),
    }

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/upload", post(upload_file))
        .route("/query", post(handle_query))
        .route("/reset", post(reset_data))
        .route("/tables", get(list_tables))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    info!("🚀 DocQA Backend 运行在 http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
