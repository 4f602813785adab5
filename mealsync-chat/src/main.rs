use std::sync::Arc;

use socketioxide::extract::SocketRef;
use socketioxide::SocketIo;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use mealsync_chat::config::{AppConfig, StorageBackend, UploadBackend};
use mealsync_chat::gateway::GatewayHandle;
use mealsync_chat::service::ChatService;
use mealsync_chat::store::{pg, ChatStore, MemoryStore, PgStore};
use mealsync_chat::uploads::{ImageUpload, MemoryUpload, MinioUpload};
use mealsync_chat::{routes, socket, AppState, SERVICE_NAME};
use mealsync_shared::clients::minio::MinioClient;
use mealsync_shared::middleware::{init_metrics, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(SERVICE_NAME);

    let config = AppConfig::load()?;
    let port = config.port;

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder not installed");
            None
        }
    };

    let store: Arc<dyn ChatStore> = match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory chat store, history is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Postgres => {
            let pool = pg::create_pool(&config.database_url, config.db_pool_size)?;
            Arc::new(PgStore::new(pool))
        }
    };

    let uploads: Arc<dyn ImageUpload> = match config.uploads {
        UploadBackend::Memory => Arc::new(MemoryUpload::new()),
        UploadBackend::Minio => {
            let client = MinioClient::new(&config.minio_settings()).await;
            Arc::new(MinioUpload::new(client))
        }
    };

    let gateway = GatewayHandle::spawn();
    let service = ChatService::new(store, gateway, uploads, config.default_restaurant_id.clone());

    let (sio_layer, io) = SocketIo::builder()
        .req_path(config.socket_path.clone())
        .build_layer();

    let state = Arc::new(AppState::new(config, service, metrics));

    io.ns("/", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                socket::handlers::on_connect(socket, state).await;
            }
        }
    });

    let app = routes::router(state.clone())
        .layer(sio_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, socket_path = %state.config.socket_path, "mealsync-chat starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
