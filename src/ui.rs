use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table, Wrap},
    Frame,
};
use chrono::{Datelike, NaiveDate};
use crate::app::{App, AppState, Focus};
use crate::config::STOCKS;
use crate::dashboard::{self, Page, Series};
use crate::data::PriceRecord;
use crate::model::{Components, ForecastRecord};

const SERIES_COLORS: [Color; 5] = [Color::Cyan, Color::Yellow, Color::Green, Color::Magenta, Color::Red];

pub fn render(f: &mut Frame, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_header(f, app, layout[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(30), Constraint::Min(0)])
        .split(layout[1]);

    render_sidebar(f, app, body[0]);

    match app.state {
        AppState::Loading => render_loading(f, "Loading data...", body[1]),
        AppState::Idle if app.view.is_none() => render_welcome(f, app, body[1]),
        _ => render_dashboard(f, app, body[1]),
    }

    render_footer(f, app, layout[2]);
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![
        Span::styled(" Stockcast ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::styled(app.selection.page.label(), Style::default().fg(Color::Yellow)),
    ];

    if let Ok(symbols) = app.selection.symbols() {
        if !symbols.is_empty() {
            spans.push(Span::raw(" | "));
            spans.push(Span::styled(
                symbols.join(", "),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ));
        }
    }

    if let Some(status) = &app.status {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(status.as_str(), Style::default().fg(Color::Green)));
    }

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let hint = match app.state {
        AppState::Loading => "Loading...",
        _ => "Tab: focus | ←/→: change | Space: toggle | Enter: run | PgUp/PgDn: panel | ↑/↓: scroll | c: clear cache | q: quit",
    };

    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" Controls: ", Style::default().fg(Color::Gray)),
        Span::styled(hint, Style::default().fg(Color::White)),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(footer, area);
}

fn focus_style(app: &App, focus: Focus) -> Style {
    if app.focus == focus {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let sel = &app.selection;
    let mut lines = vec![
        Line::from(Span::styled("Select Page", focus_style(app, Focus::Page))),
        Line::from(format!("  ◀ {} ▶", sel.page.label())),
        Line::from(""),
        Line::from(Span::styled("Select stocks", focus_style(app, Focus::Stocks))),
    ];

    for (i, (name, symbol)) in STOCKS.iter().enumerate() {
        let mark = if sel.is_selected(name) { "[x]" } else { "[ ]" };
        let cursor = if app.focus == Focus::Stocks && app.stock_cursor == i { ">" } else { " " };
        let style = if sel.is_selected(name) {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::White)
        };
        lines.push(Line::from(Span::styled(
            format!("{} {} {} ({})", cursor, mark, name, symbol),
            style,
        )));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("Years of prediction:", focus_style(app, Focus::Horizon))));
    lines.push(Line::from(format!("  ◀ {} ▶", sel.horizon.years())));

    if sel.page == Page::Forecast {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("Display Option", focus_style(app, Focus::Display))));
        for mode in dashboard::DisplayMode::ALL {
            let mark = if sel.display == mode { "(•)" } else { "( )" };
            lines.push(Line::from(format!("  {} {}", mark, mode.label())));
        }
    }

    let sidebar = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Options "));
    f.render_widget(sidebar, area);
}

fn render_loading(f: &mut Frame, msg: &str, area: Rect) {
    let block = Block::default().borders(Borders::ALL);
    let text = Paragraph::new(msg)
        .alignment(Alignment::Center)
        .block(block);
    f.render_widget(text, area);
}

fn render_welcome(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(5)])
        .split(area);

    let title = Paragraph::new(vec![
        Line::from(Span::styled(
            "Stock Prediction",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            "Pick stocks in the sidebar and press Enter",
            Style::default().fg(Color::Gray),
        )),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL).title(" Stockcast "));
    f.render_widget(title, chunks[0]);

    render_error(f, app, chunks[1]);
}

fn render_error(f: &mut Frame, app: &App, area: Rect) {
    if let Some(err) = &app.error_msg {
        let error = Paragraph::new(err.as_str())
            .style(Style::default().fg(Color::Red))
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title(" Error "));
        f.render_widget(error, area);
    }
}

fn render_dashboard(f: &mut Frame, app: &App, area: Rect) {
    let Some(view) = &app.view else {
        return;
    };

    let mut constraints = vec![Constraint::Length(10), Constraint::Min(0)];
    if app.error_msg.is_some() {
        constraints.push(Constraint::Length(4));
    }
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    // Title, timing and accuracy lines
    let summary: Vec<Line> = view
        .blocks
        .iter()
        .filter_map(|b| match b {
            dashboard::Block::Title { text } => Some(Line::from(Span::styled(
                text.as_str(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ))),
            dashboard::Block::Subheader { text } => Some(Line::from(Span::styled(
                text.as_str(),
                Style::default().fg(Color::Yellow),
            ))),
            dashboard::Block::Warning { text } => Some(Line::from(Span::styled(
                text.as_str(),
                Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
            ))),
            dashboard::Block::Text { text } => Some(Line::from(text.as_str())),
            _ => None,
        })
        .collect();
    let summary = Paragraph::new(summary)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(" Summary "));
    f.render_widget(summary, chunks[0]);

    let panels = app.panels();
    if let Some(block) = panels.get(app.panel.min(panels.len().saturating_sub(1))) {
        let title = format!(" {} ({}/{}) ", panel_title(block), app.panel + 1, panels.len());
        match block {
            dashboard::Block::PriceTable { rows, .. } => {
                render_price_table(f, rows, app.scroll, &title, chunks[1])
            }
            dashboard::Block::ForecastTable { rows, .. } => {
                render_forecast_table(f, rows, app.scroll, &title, chunks[1])
            }
            dashboard::Block::LineChart { series, .. } => render_line_chart(f, series, &title, chunks[1]),
            dashboard::Block::Components { components, .. } => {
                render_components(f, components, &title, chunks[1])
            }
            _ => {}
        }
    }

    if app.error_msg.is_some() {
        render_error(f, app, chunks[2]);
    }
}

fn panel_title(block: &dashboard::Block) -> String {
    match block {
        dashboard::Block::PriceTable { ticker, .. } => format!("Raw data for {}", ticker),
        dashboard::Block::ForecastTable { ticker, .. } => format!("Forecast - {}", ticker),
        dashboard::Block::LineChart { title, .. } => title.clone(),
        dashboard::Block::Components { ticker, .. } => format!("Forecast components - {}", ticker),
        _ => String::new(),
    }
}

fn header_row(cols: &[&'static str]) -> Row<'static> {
    Row::new(cols.iter().map(|c| Cell::from(*c)))
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
}

fn render_price_table(f: &mut Frame, rows: &[PriceRecord], scroll: usize, title: &str, area: Rect) {
    let visible = area.height.saturating_sub(3) as usize;
    let start = scroll.min(rows.len().saturating_sub(1));
    let body: Vec<Row> = rows
        .iter()
        .skip(start)
        .take(visible)
        .map(|r| {
            Row::new(vec![
                r.date.to_string(),
                format!("{:.2}", r.open),
                format!("{:.2}", r.high),
                format!("{:.2}", r.low),
                format!("{:.2}", r.close),
                format!("{:.2}", r.adj_close),
                r.volume.to_string(),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(11),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(12),
    ];
    let table = Table::new(body, widths)
        .header(header_row(&["Date", "Open", "High", "Low", "Close", "Adj Close", "Volume"]))
        .block(Block::default().borders(Borders::ALL).title(title.to_string()));
    f.render_widget(table, area);
}

fn render_forecast_table(f: &mut Frame, rows: &[ForecastRecord], scroll: usize, title: &str, area: Rect) {
    let visible = area.height.saturating_sub(3) as usize;
    let start = scroll.min(rows.len().saturating_sub(1));
    let body: Vec<Row> = rows
        .iter()
        .skip(start)
        .take(visible)
        .map(|r| {
            Row::new(vec![
                r.ds.to_string(),
                format!("{:.2}", r.yhat),
                format!("{:.2}", r.yhat_lower),
                format!("{:.2}", r.yhat_upper),
                format!("{:.2}", r.trend),
                format!("{:.3}", r.weekly),
                format!("{:.3}", r.yearly),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(11),
        Constraint::Length(10),
        Constraint::Length(11),
        Constraint::Length(11),
        Constraint::Length(10),
        Constraint::Length(9),
        Constraint::Length(9),
    ];
    let table = Table::new(body, widths)
        .header(header_row(&["ds", "yhat", "yhat_lower", "yhat_upper", "trend", "weekly", "yearly"]))
        .block(Block::default().borders(Borders::ALL).title(title.to_string()));
    f.render_widget(table, area);
}

fn day_number(date: NaiveDate) -> f64 {
    date.num_days_from_ce() as f64
}

fn bounds(points: &[Vec<(f64, f64)>]) -> ([f64; 2], [f64; 2]) {
    let mut x = [f64::INFINITY, f64::NEG_INFINITY];
    let mut y = [f64::INFINITY, f64::NEG_INFINITY];
    for (px, py) in points.iter().flatten() {
        x = [x[0].min(*px), x[1].max(*px)];
        y = [y[0].min(*py), y[1].max(*py)];
    }
    if !x[0].is_finite() {
        return ([0.0, 1.0], [0.0, 1.0]);
    }
    let pad = ((y[1] - y[0]) * 0.05).max(1e-6);
    (x, [y[0] - pad, y[1] + pad])
}

fn date_labels(x: [f64; 2]) -> Vec<Span<'static>> {
    [x[0], x[1]]
        .iter()
        .map(|d| {
            let label = NaiveDate::from_num_days_from_ce_opt(*d as i32)
                .map(|d| d.to_string())
                .unwrap_or_default();
            Span::styled(label, Style::default().fg(Color::Gray))
        })
        .collect()
}

fn value_labels(y: [f64; 2]) -> Vec<Span<'static>> {
    vec![
        Span::styled(format!("{:.1}", y[0]), Style::default().fg(Color::Gray)),
        Span::styled(format!("{:.1}", y[1]), Style::default().fg(Color::Gray)),
    ]
}

fn draw_chart(f: &mut Frame, names: &[String], points: &[Vec<(f64, f64)>], title: &str, x_labels: Vec<Span<'static>>, area: Rect) {
    let (x, y) = bounds(points);
    let datasets: Vec<Dataset> = names
        .iter()
        .zip(points)
        .enumerate()
        .map(|(i, (name, data))| {
            Dataset::default()
                .name(name.as_str())
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(SERIES_COLORS[i % SERIES_COLORS.len()]))
                .data(data)
        })
        .collect();

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .title(Span::styled(
                    title.to_string(),
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL),
        )
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds(x)
                .labels(x_labels),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds(y)
                .labels(value_labels(y)),
        );
    f.render_widget(chart, area);
}

fn render_line_chart(f: &mut Frame, series: &[Series], title: &str, area: Rect) {
    let names: Vec<String> = series.iter().map(|s| s.name.clone()).collect();
    let points: Vec<Vec<(f64, f64)>> = series
        .iter()
        .map(|s| s.x.iter().zip(&s.y).map(|(d, v)| (day_number(*d), *v)).collect())
        .collect();
    let (x, _) = bounds(&points);
    draw_chart(f, &names, &points, title, date_labels(x), area);
}

fn render_components(f: &mut Frame, components: &Components, title: &str, area: Rect) {
    let mut charts: Vec<(String, Vec<(f64, f64)>, bool)> = Vec::new();

    charts.push((
        "trend".to_string(),
        components.trend.iter().map(|p| (day_number(p.ds), p.value)).collect(),
        true,
    ));
    if let Some(weekly) = &components.weekly {
        charts.push((
            "weekly".to_string(),
            weekly.iter().enumerate().map(|(i, p)| (i as f64, p.value)).collect(),
            false,
        ));
    }
    if let Some(yearly) = &components.yearly {
        charts.push((
            "yearly".to_string(),
            yearly.iter().map(|p| (day_number(p.ds), p.value)).collect(),
            true,
        ));
    }

    let outer = Block::default().borders(Borders::ALL).title(title.to_string());
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, charts.len() as u32); charts.len()])
        .split(inner);

    for ((name, data, dated), chunk) in charts.into_iter().zip(chunks.iter()) {
        let points = vec![data];
        let (x, _) = bounds(&points);
        let x_labels = if dated {
            date_labels(x)
        } else {
            components
                .weekly
                .iter()
                .flatten()
                .map(|p| Span::styled(p.day.chars().take(3).collect::<String>(), Style::default().fg(Color::Gray)))
                .collect()
        };
        draw_chart(f, &[name.clone()], &points, &name, x_labels, *chunk);
    }
}
