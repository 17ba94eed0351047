use anyhow::Context;
use fieldcore::domain::Coordinate;
use fieldcore::integrations::{
    CachingGeocoder, ExotelProvider, Geocoder, GoogleGeocoder, MaskingProvider, RazorpayGateway,
};
use fieldcore::scheduling::TracingNotifier;
use fieldcore::{
    api, init_db, CalendarZone, Collaborators, Config, CoreContext, Repository, Scheduling,
    Settings, StoreSettings, SystemClock,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));

    let gateway = Arc::new(
        RazorpayGateway::new(
            config.razorpay_api_url.clone(),
            config.razorpay_key_id.clone(),
            config.razorpay_key_secret.clone(),
        )
        .context("failed to build payment gateway client")?,
    );

    let geocoder: Option<Arc<dyn Geocoder>> = match &config.geocoder {
        Some(geo) => {
            let google = GoogleGeocoder::new(geo.api_url.clone(), geo.api_key.clone())
                .context("failed to build geocoder client")?;
            Some(Arc::new(CachingGeocoder::new(Arc::new(google))))
        }
        None => {
            tracing::warn!("No geocoder configured; customer positions fall back to the default");
            None
        }
    };

    let masking: Option<Arc<dyn MaskingProvider>> = if config.masking.api_token.is_empty() {
        tracing::warn!("No masking provider configured; masked calls are unavailable");
        None
    } else {
        let exotel = ExotelProvider::new(
            config.masking.api_url.clone(),
            config.masking.api_token.clone(),
        )
        .context("failed to build masking client")?;
        Some(Arc::new(exotel))
    };

    let fallback_customer =
        Coordinate::new(config.fallback_customer_lat, config.fallback_customer_lng)
            .context("invalid fallback customer coordinate")?;

    let ctx = CoreContext {
        repo: repo.clone(),
        settings: Settings::new(Arc::new(StoreSettings::new(repo.clone()))),
        clock: Arc::new(SystemClock::new(CalendarZone::from_name(&config.timezone))),
        gateway,
        notifier: Arc::new(TracingNotifier),
    };
    let scheduling = Scheduling::new(
        ctx,
        Collaborators {
            geocoder,
            masking,
            caller_ids: config.masking.caller_ids.clone(),
            fallback_customer,
        },
    );

    let _sweeper = scheduling
        .sweeper
        .spawn(Duration::from_secs(config.sweep_interval_secs));

    let app = api::create_router(api::AppState::new(repo, scheduling, &config.jwt_secret));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
