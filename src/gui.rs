use crate::config::STOCKS;
use crate::dashboard::{Block, Dashboard, DisplayMode, Page, Selection, Series, View};
use crate::data::{DataSource, MarketDataSource, PriceRecord};
use crate::forecast::Horizon;
use crate::model::{Components, ForecastRecord, TrendPoint};
use chrono::{NaiveDate, NaiveTime, TimeZone};
use eframe::egui;
use egui_plot::{Bar, BarChart, Legend, Line, Plot, PlotBounds, PlotPoints};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

// ──────────────────────────────────────────────────────────────────────────────
// Color Palette
// ──────────────────────────────────────────────────────────────────────────────

const ACCENT_BLUE: egui::Color32 = egui::Color32::from_rgb(59, 130, 246);
const ACCENT_GREEN: egui::Color32 = egui::Color32::from_rgb(34, 197, 94);
const ACCENT_RED: egui::Color32 = egui::Color32::from_rgb(239, 68, 68);
const ACCENT_YELLOW: egui::Color32 = egui::Color32::from_rgb(250, 204, 21);
const ACCENT_ORANGE: egui::Color32 = egui::Color32::from_rgb(251, 146, 60);
const ACCENT_CYAN: egui::Color32 = egui::Color32::from_rgb(34, 211, 238);
const ACCENT_PURPLE: egui::Color32 = egui::Color32::from_rgb(168, 85, 247);

const BG_DARK: egui::Color32 = egui::Color32::from_rgb(15, 15, 20);
const BG_CARD: egui::Color32 = egui::Color32::from_rgb(24, 24, 32);
const BG_ELEVATED: egui::Color32 = egui::Color32::from_rgb(32, 32, 44);
const TEXT_PRIMARY: egui::Color32 = egui::Color32::from_rgb(226, 232, 240);
const TEXT_SECONDARY: egui::Color32 = egui::Color32::from_rgb(148, 163, 184);
const BORDER_SUBTLE: egui::Color32 = egui::Color32::from_rgb(51, 51, 68);

const SERIES_COLORS: [egui::Color32; 5] = [ACCENT_CYAN, ACCENT_ORANGE, ACCENT_GREEN, ACCENT_PURPLE, ACCENT_YELLOW];

const TABLE_ROW_HEIGHT: f32 = 18.0;
const TABLE_MAX_HEIGHT: f32 = 280.0;

/// Result of a background render, tagged with the selection it was made for.
type RenderResult = (Selection, Result<View, String>);

pub struct GuiApp {
    dashboard: Arc<Dashboard<DataSource>>,
    selection: Selection,
    /// Selection of the most recently started render.
    requested: Option<Selection>,
    view: Option<Arc<View>>,
    error_msg: Option<String>,
    status: Option<String>,
    render_rx: Option<mpsc::Receiver<RenderResult>>,
    /// Visible window of the forecast chart as fractions of the full x range.
    chart_range: (f64, f64),
}

impl GuiApp {
    pub fn new(dashboard: Arc<Dashboard<DataSource>>) -> Self {
        Self {
            dashboard,
            selection: Selection::default(),
            requested: None,
            view: None,
            error_msg: None,
            status: None,
            render_rx: None,
            chart_range: (0.0, 1.0),
        }
    }

    fn apply_theme(ctx: &egui::Context) {
        let mut style = (*ctx.style()).clone();

        style.visuals.window_rounding = egui::Rounding::same(8.0);
        style.visuals.widgets.noninteractive.rounding = egui::Rounding::same(6.0);
        style.visuals.widgets.inactive.rounding = egui::Rounding::same(6.0);
        style.visuals.widgets.active.rounding = egui::Rounding::same(6.0);
        style.visuals.widgets.hovered.rounding = egui::Rounding::same(6.0);

        style.visuals.dark_mode = true;
        style.visuals.panel_fill = BG_DARK;
        style.visuals.window_fill = BG_CARD;
        style.visuals.faint_bg_color = BG_ELEVATED;

        style.visuals.widgets.noninteractive.bg_fill = BG_CARD;
        style.visuals.widgets.noninteractive.fg_stroke = egui::Stroke::new(1.0, TEXT_SECONDARY);
        style.visuals.widgets.inactive.bg_fill = BG_ELEVATED;
        style.visuals.widgets.inactive.fg_stroke = egui::Stroke::new(1.0, TEXT_PRIMARY);
        style.visuals.widgets.hovered.bg_fill = egui::Color32::from_rgb(45, 45, 60);
        style.visuals.widgets.hovered.fg_stroke = egui::Stroke::new(1.0, egui::Color32::WHITE);
        style.visuals.widgets.active.bg_fill = ACCENT_BLUE;
        style.visuals.widgets.active.fg_stroke = egui::Stroke::new(1.0, egui::Color32::WHITE);

        style.visuals.selection.bg_fill = ACCENT_BLUE.linear_multiply(0.4);
        style.visuals.selection.stroke = egui::Stroke::new(1.0, ACCENT_BLUE);

        style.spacing.item_spacing = egui::vec2(8.0, 6.0);

        ctx.set_style(style);
    }

    fn is_rendering(&self) -> bool {
        self.render_rx.is_some()
    }

    /// Starts a render whenever the selection differs from the last request.
    fn maybe_start_render(&mut self, ctx: &egui::Context) {
        if self.is_rendering() || self.requested.as_ref() == Some(&self.selection) {
            return;
        }

        let selection = self.selection.clone();
        self.requested = Some(selection.clone());
        let (tx, rx) = mpsc::channel(1);
        self.render_rx = Some(rx);

        let dashboard = self.dashboard.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = dashboard.render(&selection).await.map_err(|e| format!("{:#}", e));
            let _ = tx.send((selection, result)).await;
            ctx.request_repaint();
        });
    }

    fn poll_render(&mut self) {
        let Some(rx) = &mut self.render_rx else {
            return;
        };
        match rx.try_recv() {
            Ok((selection, Ok(view))) => {
                if selection == self.selection {
                    self.view = Some(Arc::new(view));
                    self.error_msg = None;
                }
                self.render_rx = None;
            }
            Ok((selection, Err(e))) => {
                error!("Render failed: {}", e);
                if selection == self.selection {
                    self.error_msg = Some(e);
                }
                self.render_rx = None;
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.error_msg = Some("render task stopped unexpectedly".to_string());
                self.render_rx = None;
            }
        }
    }

    fn clear_cache(&mut self) {
        let dashboard = self.dashboard.clone();
        tokio::spawn(async move {
            dashboard.clear_cache().await;
        });
        self.status = Some("Cache cleared".to_string());
    }
}

impl eframe::App for GuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        Self::apply_theme(ctx);
        self.poll_render();

        // ── Top Bar ──
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                ui.add_space(8.0);
                ui.label(egui::RichText::new("Stockcast")
                    .size(18.0)
                    .strong()
                    .color(ACCENT_BLUE));
                ui.add_space(4.0);
                ui.label(egui::RichText::new("Your Stock Prediction App")
                    .size(11.0)
                    .color(TEXT_SECONDARY));

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.add_space(8.0);
                    ui.label(egui::RichText::new(format!("source: {}", self.dashboard.source().name()))
                        .size(11.0)
                        .color(TEXT_SECONDARY));
                    if let Some(status) = &self.status {
                        ui.label(egui::RichText::new(status).size(11.0).color(ACCENT_GREEN));
                    }
                });
            });
            ui.add_space(4.0);
        });

        // ── Controls ──
        egui::SidePanel::left("controls")
            .resizable(false)
            .default_width(220.0)
            .show(ctx, |ui| {
                self.render_controls(ui);
            });

        // ── Main Content ──
        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_main(ui, ctx);
        });

        self.maybe_start_render(ctx);
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Sidebar
// ──────────────────────────────────────────────────────────────────────────────

impl GuiApp {
    fn render_controls(&mut self, ui: &mut egui::Ui) {
        ui.add_space(8.0);
        section_header(ui, "Select Page");
        egui::ComboBox::from_id_salt("page")
            .selected_text(self.selection.page.label())
            .show_ui(ui, |ui| {
                for page in Page::ALL {
                    ui.selectable_value(&mut self.selection.page, page, page.label());
                }
            });

        ui.add_space(12.0);
        section_header(ui, "Select stocks");
        for (name, symbol) in STOCKS {
            let mut checked = self.selection.is_selected(name);
            let label = format!("{} ({})", name, symbol);
            if ui.checkbox(&mut checked, label).changed() {
                self.selection.toggle_stock(name);
            }
        }

        ui.add_space(12.0);
        section_header(ui, "Years of prediction:");
        let mut years = self.selection.horizon.years();
        if ui.add(egui::Slider::new(&mut years, 1..=4)).changed() {
            if let Ok(h) = Horizon::from_years(years) {
                self.selection.horizon = h;
            }
        }

        if self.selection.page == Page::Forecast {
            ui.add_space(12.0);
            section_header(ui, "Display Option");
            for mode in DisplayMode::ALL {
                ui.radio_value(&mut self.selection.display, mode, mode.label());
            }
        }

        ui.add_space(20.0);
        let btn = ui.add_sized(
            [180.0, 30.0],
            egui::Button::new(egui::RichText::new("Clear cache").size(13.0))
                .rounding(egui::Rounding::same(6.0)),
        );
        if btn.clicked() {
            self.clear_cache();
        }

        if let Some((history, forecast)) = self.dashboard.try_cache_sizes() {
            ui.add_space(8.0);
            stat_row(ui, "History entries", &history.to_string(), TEXT_PRIMARY);
            stat_row(ui, "Forecast entries", &forecast.to_string(), TEXT_PRIMARY);
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Main Area
// ──────────────────────────────────────────────────────────────────────────────

impl GuiApp {
    fn render_main(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        if self.is_rendering() {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(egui::RichText::new("Loading data...").color(TEXT_SECONDARY));
            });
            ctx.request_repaint();
        }

        if let Some(err) = &self.error_msg {
            egui::Frame::none()
                .fill(egui::Color32::from_rgba_premultiplied(239, 68, 68, 25))
                .rounding(egui::Rounding::same(6.0))
                .inner_margin(egui::Margin::same(8.0))
                .show(ui, |ui| {
                    ui.label(egui::RichText::new(format!("Error: {}", err))
                        .color(ACCENT_RED)
                        .size(12.0));
                });
            ui.add_space(8.0);
        }

        let Some(view) = self.view.clone() else {
            return;
        };

        egui::ScrollArea::vertical().id_salt("main_scroll").show(ui, |ui| {
            for (idx, block) in view.blocks.iter().enumerate() {
                self.render_block(ui, idx, block);
            }
        });
    }

    fn render_block(&mut self, ui: &mut egui::Ui, idx: usize, block: &Block) {
        match block {
            Block::Title { text } => {
                ui.label(egui::RichText::new(text).size(24.0).strong().color(TEXT_PRIMARY));
                ui.add_space(6.0);
            }
            Block::Subheader { text } => {
                ui.add_space(6.0);
                ui.label(egui::RichText::new(text).size(17.0).strong().color(ACCENT_CYAN));
            }
            Block::Text { text } => {
                ui.label(egui::RichText::new(text).size(13.0).color(TEXT_PRIMARY));
            }
            Block::Warning { text } => {
                egui::Frame::none()
                    .fill(egui::Color32::from_rgba_premultiplied(250, 204, 21, 25))
                    .rounding(egui::Rounding::same(6.0))
                    .inner_margin(egui::Margin::same(10.0))
                    .show(ui, |ui| {
                        ui.label(egui::RichText::new(text).color(ACCENT_YELLOW).size(13.0));
                    });
            }
            Block::PriceTable { ticker, rows } => card(ui, |ui| price_table(ui, idx, ticker, rows)),
            Block::ForecastTable { ticker, rows } => {
                card(ui, |ui| forecast_table(ui, idx, ticker, rows))
            }
            Block::LineChart { title, series, range_slider } => {
                let mut range = self.chart_range;
                card(ui, |ui| line_chart(ui, idx, title, series, range_slider.then_some(&mut range)));
                self.chart_range = range;
            }
            Block::Components { ticker, components } => {
                card(ui, |ui| components_charts(ui, idx, ticker, components))
            }
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Block Widgets
// ──────────────────────────────────────────────────────────────────────────────

fn card(ui: &mut egui::Ui, add_contents: impl FnOnce(&mut egui::Ui)) {
    egui::Frame::none()
        .fill(BG_CARD)
        .rounding(egui::Rounding::same(8.0))
        .stroke(egui::Stroke::new(1.0, BORDER_SUBTLE))
        .inner_margin(egui::Margin::same(8.0))
        .show(ui, add_contents);
    ui.add_space(6.0);
}

fn header_cells(ui: &mut egui::Ui, cols: &[&str]) {
    for col in cols {
        ui.label(egui::RichText::new(*col).size(11.0).strong().color(TEXT_SECONDARY));
    }
    ui.end_row();
}

fn price_table(ui: &mut egui::Ui, idx: usize, ticker: &str, rows: &[PriceRecord]) {
    section_header(ui, &format!("{} ({} rows)", ticker, rows.len()));
    egui::ScrollArea::vertical()
        .id_salt(("price_table", idx))
        .max_height(TABLE_MAX_HEIGHT)
        .show_rows(ui, TABLE_ROW_HEIGHT, rows.len(), |ui, range| {
            egui::Grid::new(("price_grid", idx)).striped(true).show(ui, |ui| {
                header_cells(ui, &["Date", "Open", "High", "Low", "Close", "Adj Close", "Volume"]);
                for r in &rows[range] {
                    ui.label(r.date.to_string());
                    ui.label(format!("{:.2}", r.open));
                    ui.label(format!("{:.2}", r.high));
                    ui.label(format!("{:.2}", r.low));
                    ui.label(format!("{:.2}", r.close));
                    ui.label(format!("{:.2}", r.adj_close));
                    ui.label(r.volume.to_string());
                    ui.end_row();
                }
            });
        });
}

fn forecast_table(ui: &mut egui::Ui, idx: usize, ticker: &str, rows: &[ForecastRecord]) {
    section_header(ui, &format!("{} ({} rows)", ticker, rows.len()));
    egui::ScrollArea::both()
        .id_salt(("forecast_table", idx))
        .max_height(TABLE_MAX_HEIGHT)
        .show_rows(ui, TABLE_ROW_HEIGHT, rows.len(), |ui, range| {
            egui::Grid::new(("forecast_grid", idx)).striped(true).show(ui, |ui| {
                header_cells(
                    ui,
                    &["ds", "trend", "trend_lower", "trend_upper", "yearly", "weekly", "yhat_lower", "yhat", "yhat_upper"],
                );
                for r in &rows[range] {
                    ui.label(r.ds.to_string());
                    for v in [r.trend, r.trend_lower, r.trend_upper, r.yearly, r.weekly, r.yhat_lower, r.yhat, r.yhat_upper] {
                        ui.label(format!("{:.3}", v));
                    }
                    ui.end_row();
                }
            });
        });
}

fn timestamp(date: NaiveDate) -> f64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp() as f64
}

fn format_timestamp(x: f64, fmt: &str) -> String {
    chrono::Utc.timestamp_opt(x as i64, 0)
        .map(|dt| dt.format(fmt).to_string())
        .single()
        .unwrap_or_default()
}

fn point_label(name: &str, value: &egui_plot::PlotPoint) -> String {
    format!("{}\nDate: {}\nValue: {:.2}", name, format_timestamp(value.x, "%Y-%m-%d"), value.y)
}

fn line_chart(ui: &mut egui::Ui, idx: usize, title: &str, series: &[Series], range: Option<&mut (f64, f64)>) {
    section_header(ui, title);

    let lines: Vec<(String, Vec<[f64; 2]>)> = series
        .iter()
        .map(|s| {
            let pts = s.x.iter().zip(&s.y).map(|(d, v)| [timestamp(*d), *v]).collect();
            (s.name.clone(), pts)
        })
        .collect();

    let (x_min, x_max) = lines
        .iter()
        .flat_map(|(_, pts)| pts.iter().map(|p| p[0]))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));

    let window = match &range {
        Some(r) if x_min.is_finite() && (r.0 > 0.0 || r.1 < 1.0) => {
            let span = x_max - x_min;
            Some((x_min + span * r.0, x_min + span * r.1))
        }
        _ => None,
    };

    let plot = Plot::new(("line_chart", idx))
        .legend(Legend::default().position(egui_plot::Corner::LeftTop))
        .x_axis_formatter(|x, _range| format_timestamp(x.value, "%Y-%m"))
        .label_formatter(point_label)
        .view_aspect(2.5)
        .allow_drag(window.is_none())
        .allow_zoom(window.is_none());

    plot.show(ui, |plot_ui| {
        for (i, (name, pts)) in lines.iter().enumerate() {
            plot_ui.line(
                Line::new(PlotPoints::from(pts.clone()))
                    .name(name)
                    .color(SERIES_COLORS[i % SERIES_COLORS.len()])
                    .width(1.6),
            );
        }

        if let Some((lo, hi)) = window {
            let (y_lo, y_hi) = lines
                .iter()
                .flat_map(|(_, pts)| pts.iter())
                .filter(|p| p[0] >= lo && p[0] <= hi)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), p| (a.min(p[1]), b.max(p[1])));
            if y_lo.is_finite() {
                let pad = ((y_hi - y_lo) * 0.05).max(1e-6);
                plot_ui.set_plot_bounds(PlotBounds::from_min_max([lo, y_lo - pad], [hi, y_hi + pad]));
            }
        }
    });

    if let Some(r) = range {
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Range").size(11.0).color(TEXT_SECONDARY));
            ui.add(egui::Slider::new(&mut r.0, 0.0..=0.99).show_value(false));
            ui.add(egui::Slider::new(&mut r.1, 0.01..=1.0).show_value(false));
            if r.0 >= r.1 {
                r.0 = (r.1 - 0.01).max(0.0);
            }
            if let Some((lo, hi)) = window {
                ui.label(egui::RichText::new(format!(
                    "{} → {}",
                    format_timestamp(lo, "%Y-%m-%d"),
                    format_timestamp(hi, "%Y-%m-%d")
                ))
                .size(11.0)
                .color(TEXT_SECONDARY));
            }
        });
    }
}

fn components_charts(ui: &mut egui::Ui, idx: usize, ticker: &str, components: &Components) {
    section_header(ui, &format!("{} trend", ticker));
    Plot::new(("trend", idx))
        .legend(Legend::default().position(egui_plot::Corner::LeftTop))
        .x_axis_formatter(|x, _range| format_timestamp(x.value, "%Y-%m"))
        .label_formatter(point_label)
        .height(180.0)
        .show(ui, |plot_ui| {
            let pts = |f: fn(&TrendPoint) -> f64| -> PlotPoints {
                components.trend.iter().map(|p| [timestamp(p.ds), f(p)]).collect()
            };
            plot_ui.line(Line::new(pts(|p| p.value)).name("trend").color(ACCENT_BLUE).width(1.6));
            plot_ui.line(Line::new(pts(|p| p.lower)).name("trend_lower").color(TEXT_SECONDARY));
            plot_ui.line(Line::new(pts(|p| p.upper)).name("trend_upper").color(TEXT_SECONDARY));
        });

    if let Some(weekly) = &components.weekly {
        section_header(ui, "weekly");
        let bars: Vec<Bar> = weekly
            .iter()
            .enumerate()
            .map(|(i, p)| Bar::new(i as f64, p.value).name(&p.day).fill(ACCENT_ORANGE))
            .collect();
        let days: Vec<String> = weekly.iter().map(|p| p.day.clone()).collect();
        Plot::new(("weekly", idx))
            .height(140.0)
            .x_axis_formatter(move |x, _range| {
                days.get(x.value.round() as usize)
                    .filter(|_| (x.value - x.value.round()).abs() < 1e-6)
                    .cloned()
                    .unwrap_or_default()
            })
            .show(ui, |plot_ui| {
                plot_ui.bar_chart(BarChart::new(bars).name("weekly"));
            });
    }

    if let Some(yearly) = &components.yearly {
        section_header(ui, "yearly");
        Plot::new(("yearly", idx))
            .height(140.0)
            .x_axis_formatter(|x, _range| format_timestamp(x.value, "%b %d"))
            .show(ui, |plot_ui| {
                let pts: PlotPoints = yearly.iter().map(|p| [timestamp(p.ds), p.value]).collect();
                plot_ui.line(Line::new(pts).name("yearly").color(ACCENT_PURPLE).width(1.6));
            });
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────────────────────────────────────

fn section_header(ui: &mut egui::Ui, text: &str) {
    ui.label(egui::RichText::new(text)
        .size(13.0)
        .strong()
        .color(TEXT_PRIMARY));
    ui.add_space(4.0);
}

fn stat_row(ui: &mut egui::Ui, label: &str, value: &str, color: egui::Color32) {
    ui.horizontal(|ui| {
        ui.label(egui::RichText::new(label).size(11.0).color(TEXT_SECONDARY));
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            ui.label(egui::RichText::new(value).size(12.0).strong().color(color));
        });
    });
}
