mod app;
mod cache;
mod config;
mod dashboard;
mod data;
mod forecast;
mod gui;
mod linalg;
mod model;
mod tui;
mod ui;
mod webui;

use app::App;
use cache::CachePolicy;
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use config::DataSourceKind;
use dashboard::{Dashboard, DashboardConfig};
use data::DataSource;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, ValueEnum)]
enum GuiRendererChoice {
    Auto,
    Wgpu,
    Glow,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DataSourceChoice {
    Yahoo,
    Mock,
}

impl From<DataSourceChoice> for DataSourceKind {
    fn from(value: DataSourceChoice) -> Self {
        match value {
            DataSourceChoice::Yahoo => DataSourceKind::Yahoo,
            DataSourceChoice::Mock => DataSourceKind::Mock,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stockcast: historical stock prices and multi-year forecasts with an additive time-series model",
    after_help = "EXAMPLES:
    # Terminal dashboard
    cargo run --release

    # Desktop GUI
    cargo run --release -- --gui

    # Browser UI on port 9000 with offline data
    cargo run --release -- --webui --webui-port 9000 --data-source mock"
)]
struct Args {
    /// Launch in GUI mode
    #[arg(long)]
    gui: bool,

    /// Launch in WebUI mode
    #[arg(long)]
    webui: bool,

    /// WebUI server port
    #[arg(long, default_value_t = 8080)]
    webui_port: u16,

    /// Market data source (default: STOCKCAST_DATA_SOURCE, else yahoo)
    #[arg(long, value_enum)]
    data_source: Option<DataSourceChoice>,

    /// Seconds a cached history or forecast stays valid (default: STOCKCAST_CACHE_TTL_SECS, else 3600)
    #[arg(long)]
    cache_ttl_secs: Option<u64>,

    /// Recompute every request instead of reusing cached results
    #[arg(long)]
    no_cache: bool,

    /// First day of the historical window, YYYY-MM-DD (default: 2015-01-01)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// GUI renderer backend (auto|wgpu|glow). Useful for RDP compatibility.
    #[arg(long, value_enum, default_value_t = GuiRendererChoice::Wgpu)]
    gui_renderer: GuiRendererChoice,

    /// Enable GUI safe mode for remote desktop (disables vsync/MSAA and hardware acceleration).
    #[arg(long)]
    gui_safe_mode: bool,
}

impl Args {
    fn dashboard_config(&self) -> DashboardConfig {
        DashboardConfig {
            start: self.start_date.unwrap_or_else(config::default_start_date),
            end: None,
            cache: CachePolicy {
                enabled: !self.no_cache,
                ttl: Duration::from_secs(self.cache_ttl_secs.unwrap_or_else(config::cache_ttl_secs)),
                max_entries: config::cache_max_entries(),
            },
            ..DashboardConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("stockcast=info,wgpu_core=error,wgpu_hal=error")
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();
    let args = Args::parse();

    config::init_cpu_parallelism();

    let kind = args
        .data_source
        .map(DataSourceKind::from)
        .unwrap_or_else(config::configured_data_source);
    let source = match DataSource::from_kind(kind) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to initialise {} data source: {:#}", kind.as_str(), e);
            return Ok(());
        }
    };
    let dash_config = args.dashboard_config();
    info!(
        "Data source: {}, history from {}, cache {} (ttl {}s)",
        kind.as_str(),
        dash_config.start,
        if dash_config.cache.enabled { "on" } else { "off" },
        dash_config.cache.ttl.as_secs()
    );
    let dashboard = Arc::new(Dashboard::new(source, dash_config));

    if args.gui {
        let mut options = eframe::NativeOptions::default();
        options.renderer = match args.gui_renderer {
            GuiRendererChoice::Auto => eframe::Renderer::Wgpu,
            GuiRendererChoice::Wgpu => eframe::Renderer::Wgpu,
            GuiRendererChoice::Glow => eframe::Renderer::Glow,
        };

        if args.gui_safe_mode {
            options.vsync = false;
            options.multisampling = 0;
            options.depth_buffer = 0;
            options.stencil_buffer = 0;
            options.hardware_acceleration = eframe::HardwareAcceleration::Off;
        }

        info!(
            "Launching GUI with renderer: {:?}, safe_mode={}",
            args.gui_renderer,
            args.gui_safe_mode
        );
        eframe::run_native(
            "Stockcast",
            options,
            Box::new(|_cc| Ok(Box::new(gui::GuiApp::new(dashboard)))),
        ).map_err(|e| io::Error::other(e.to_string()))?;
        return Ok(());
    }

    if args.webui {
        match webui::run_webui_server(args.webui_port, dashboard).await {
            Ok(_) => info!("WebUI exited."),
            Err(e) => error!("WebUI failed: {:#}", e),
        }
        return Ok(());
    }

    let mut terminal = tui::init()?;
    let mut app = App::new();
    let res = app.run(&mut terminal, &*dashboard).await;

    tui::restore()?;

    if let Err(e) = res {
        error!("Error: {:?}", e);
    }

    Ok(())
}
