use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;

use config::Config;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_latest_block,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::submit_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::create_wallet,
        api::handlers::get_wallet_balance
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            api::schema::ChainResponse,
            api::schema::TransactionRequest,
            api::schema::TransactionResponse,
            api::schema::MineRequest,
            api::schema::MineResponse,
            api::schema::ValidationResponse,
            api::schema::WalletResponse,
            api::schema::BalanceResponse,
            api::schema::ErrorResponse
        )
    ),
    tags(
        (name = "ledger", description = "Proof-of-work ledger API endpoints")
    ),
    info(
        title = "Ledger API",
        version = "0.1.0",
        description = "An in-memory proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().context("failed to load configuration")?;

    info!(
        "Starting ledger with difficulty {} and mining reward {}",
        config.ledger.difficulty, config.ledger.mining_reward
    );
    let blockchain = web::Data::new(blockchain::Blockchain::new(config.ledger.clone()));

    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server at http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(bind.clone())
    .with_context(|| format!("failed to bind {}:{}", bind.0, bind.1))?
    .run()
    .await?;

    Ok(())
}
