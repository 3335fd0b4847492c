use crate::config::{MAX_HORIZON_YEARS, MIN_HORIZON_YEARS, STOCKS};
use crate::dashboard::{Block, Dashboard, DisplayMode, Page, Selection, View};
use crate::data::MarketDataSource;
use crate::forecast::Horizon;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use std::io;
use tracing::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    Idle,
    Loading,
    Ready,
}

/// Sidebar control that currently receives ←/→ and Space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Focus {
    Page,
    Stocks,
    Horizon,
    Display,
}

impl Focus {
    /// Display mode only exists on the forecast page.
    fn order(page: Page) -> &'static [Focus] {
        match page {
            Page::HistoricalData => &[Focus::Page, Focus::Stocks, Focus::Horizon],
            Page::Forecast => &[Focus::Page, Focus::Stocks, Focus::Horizon, Focus::Display],
        }
    }

    fn step(self, page: Page, forward: bool) -> Focus {
        let order = Focus::order(page);
        let idx = order.iter().position(|f| *f == self).unwrap_or(0);
        let next = if forward {
            (idx + 1) % order.len()
        } else {
            (idx + order.len() - 1) % order.len()
        };
        order[next]
    }
}

/// What the event loop must do after a key press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    Run,
    ClearCache,
    Quit,
}

pub struct App {
    pub should_quit: bool,
    pub state: AppState,
    pub selection: Selection,
    pub focus: Focus,
    pub stock_cursor: usize,
    pub view: Option<View>,
    pub panel: usize,
    pub scroll: usize,
    pub error_msg: Option<String>,
    pub status: Option<String>,
}

impl App {
    pub fn new() -> Self {
        Self {
            should_quit: false,
            state: AppState::Idle,
            selection: Selection::default(),
            focus: Focus::Page,
            stock_cursor: 0,
            view: None,
            panel: 0,
            scroll: 0,
            error_msg: None,
            status: None,
        }
    }

    /// Data-bearing blocks of the current view, one per switchable panel.
    pub fn panels(&self) -> Vec<&Block> {
        self.view
            .iter()
            .flat_map(|v| v.blocks.iter())
            .filter(|b| {
                matches!(
                    b,
                    Block::PriceTable { .. }
                        | Block::ForecastTable { .. }
                        | Block::LineChart { .. }
                        | Block::Components { .. }
                )
            })
            .collect()
    }

    pub fn handle_key(&mut self, code: KeyCode) -> Action {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
                return Action::Quit;
            }
            KeyCode::Char('c') => return Action::ClearCache,
            KeyCode::Enter => return Action::Run,
            KeyCode::Tab => self.focus = self.focus.step(self.selection.page, true),
            KeyCode::BackTab => self.focus = self.focus.step(self.selection.page, false),
            KeyCode::Left => self.change(false),
            KeyCode::Right => self.change(true),
            KeyCode::Char(' ') => {
                if self.focus == Focus::Stocks {
                    if let Some((name, _)) = STOCKS.get(self.stock_cursor) {
                        self.selection.toggle_stock(name);
                    }
                }
            }
            KeyCode::PageDown => {
                let n = self.panels().len();
                if n > 0 {
                    self.panel = (self.panel + 1) % n;
                    self.scroll = 0;
                }
            }
            KeyCode::PageUp => {
                let n = self.panels().len();
                if n > 0 {
                    self.panel = (self.panel + n - 1) % n;
                    self.scroll = 0;
                }
            }
            KeyCode::Down => self.scroll = self.scroll.saturating_add(1),
            KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
            _ => {}
        }
        Action::None
    }

    fn change(&mut self, forward: bool) {
        match self.focus {
            Focus::Page => {
                self.selection.page = match self.selection.page {
                    Page::HistoricalData => Page::Forecast,
                    Page::Forecast => Page::HistoricalData,
                };
            }
            Focus::Stocks => {
                let n = STOCKS.len();
                self.stock_cursor = if forward {
                    (self.stock_cursor + 1) % n
                } else {
                    (self.stock_cursor + n - 1) % n
                };
            }
            Focus::Horizon => {
                let years = self.selection.horizon.years();
                let years = if forward {
                    (years + 1).min(MAX_HORIZON_YEARS)
                } else {
                    years.saturating_sub(1).max(MIN_HORIZON_YEARS)
                };
                if let Ok(h) = Horizon::from_years(years) {
                    self.selection.horizon = h;
                }
            }
            Focus::Display => {
                let all = DisplayMode::ALL;
                let idx = all.iter().position(|m| *m == self.selection.display).unwrap_or(0);
                let next = if forward {
                    (idx + 1) % all.len()
                } else {
                    (idx + all.len() - 1) % all.len()
                };
                self.selection.display = all[next];
            }
        }
    }

    /// Performs an [`Action`] against the dashboard.
    pub async fn execute<S: MarketDataSource>(&mut self, dashboard: &Dashboard<S>, action: Action) {
        match action {
            Action::Run => {
                self.state = AppState::Loading;
                match dashboard.render(&self.selection).await {
                    Ok(view) => {
                        self.view = Some(view);
                        self.panel = 0;
                        self.scroll = 0;
                        self.error_msg = None;
                        self.state = AppState::Ready;
                    }
                    Err(e) => {
                        error!("Render failed: {:#}", e);
                        self.error_msg = Some(format!("{:#}", e));
                        self.state = if self.view.is_some() { AppState::Ready } else { AppState::Idle };
                    }
                }
            }
            Action::ClearCache => {
                dashboard.clear_cache().await;
                self.status = Some("Cache cleared".to_string());
            }
            Action::None | Action::Quit => {}
        }
    }

    pub async fn run<S: MarketDataSource>(
        &mut self,
        terminal: &mut crate::tui::Tui,
        dashboard: &Dashboard<S>,
    ) -> io::Result<()> {
        info!("TUI started (source={})", dashboard.source().name());
        while !self.should_quit {
            terminal.draw(|f| crate::ui::render(f, self))?;

            if event::poll(std::time::Duration::from_millis(16))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        let action = self.handle_key(key.code);
                        if action == Action::Run {
                            // Show the loading state before the render blocks the loop.
                            self.state = AppState::Loading;
                            terminal.draw(|f| crate::ui::render(f, self))?;
                        }
                        self.execute(dashboard, action).await;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::dashboard::DashboardConfig;
    use crate::data::MockSource;
    use crate::model::ModelSettings;
    use chrono::NaiveDate;

    #[test]
    fn test_focus_cycles_and_skips_display_on_history_page() {
        let mut app = App::new();
        assert_eq!(app.focus, Focus::Page);
        app.handle_key(KeyCode::Tab);
        app.handle_key(KeyCode::Tab);
        assert_eq!(app.focus, Focus::Horizon);
        app.handle_key(KeyCode::Tab);
        assert_eq!(app.focus, Focus::Page);

        app.handle_key(KeyCode::Right);
        assert_eq!(app.selection.page, Page::Forecast);
        app.handle_key(KeyCode::BackTab);
        assert_eq!(app.focus, Focus::Display);
    }

    #[test]
    fn test_space_toggles_stock_under_cursor() {
        let mut app = App::new();
        app.handle_key(KeyCode::Tab);
        app.handle_key(KeyCode::Right);
        app.handle_key(KeyCode::Right);
        app.handle_key(KeyCode::Right);
        app.handle_key(KeyCode::Char(' '));
        assert_eq!(app.selection.stocks, vec!["Apple"]);
        app.handle_key(KeyCode::Char(' '));
        assert!(app.selection.stocks.is_empty());
    }

    #[test]
    fn test_horizon_is_clamped() {
        let mut app = App::new();
        app.focus = Focus::Horizon;
        app.handle_key(KeyCode::Left);
        assert_eq!(app.selection.horizon.years(), 1);
        for _ in 0..6 {
            app.handle_key(KeyCode::Right);
        }
        assert_eq!(app.selection.horizon.years(), 4);
    }

    #[test]
    fn test_display_mode_wraps() {
        let mut app = App::new();
        app.focus = Focus::Display;
        app.handle_key(KeyCode::Left);
        assert_eq!(app.selection.display, DisplayMode::ForecastData);
        app.handle_key(KeyCode::Right);
        assert_eq!(app.selection.display, DisplayMode::ForecastPlot);
    }

    #[test]
    fn test_action_keys() {
        let mut app = App::new();
        assert_eq!(app.handle_key(KeyCode::Enter), Action::Run);
        assert_eq!(app.handle_key(KeyCode::Char('c')), Action::ClearCache);
        assert!(!app.should_quit);
        assert_eq!(app.handle_key(KeyCode::Char('q')), Action::Quit);
        assert!(app.should_quit);
    }

    #[tokio::test]
    async fn test_run_action_renders_view_and_panels() {
        let dashboard = Dashboard::new(
            MockSource::new(),
            DashboardConfig {
                start: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2023, 3, 31),
                cache: CachePolicy::default(),
                settings: ModelSettings::default(),
            },
        );
        let mut app = App::new();
        app.selection.stocks = vec!["Apple".to_string(), "Google".to_string()];

        app.execute(&dashboard, Action::Run).await;
        assert_eq!(app.state, AppState::Ready);
        assert!(app.error_msg.is_none());
        assert_eq!(app.panels().len(), 2);

        app.handle_key(KeyCode::Down);
        app.handle_key(KeyCode::PageDown);
        assert_eq!((app.panel, app.scroll), (1, 0));
        app.handle_key(KeyCode::PageDown);
        assert_eq!(app.panel, 0);

        app.selection.stocks = vec!["Initech".to_string()];
        app.execute(&dashboard, Action::Run).await;
        assert!(app.error_msg.as_deref().unwrap_or("").contains("Initech"));
        assert_eq!(app.state, AppState::Ready);
    }
}
